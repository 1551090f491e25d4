//! Mock transport for testing.
//!
//! [`MockTransport`] implements [`Transport`] without any radio, so a full
//! [`Session`](crate::Session) can be driven from tests and demos.
//!
//! # Features
//!
//! - **Scripted discovery**: devices added with [`MockTransport::add_device`]
//!   are reported when a scan starts
//! - **Failure injection**: refuse the next command or connect attempt
//! - **Auto-response**: answer every accepted command with a success
//!   response and confirm connects and disconnects, or leave that to the test
//! - **Command log**: every call is recorded as a [`MockCommand`]
//! - **Event helpers**: push any [`TransportEvent`] onto the channel
//!
//! # Example
//!
//! ```
//! use zenlite_core::{MockTransport, Transport};
//!
//! let (transport, mut events) = MockTransport::new();
//! let device = transport.add_random_device();
//! transport.start_scan();
//!
//! let found = events.try_recv().unwrap();
//! assert_eq!(found.kind(), "found");
//! assert!(transport.commands().len() == 1);
//! # let _ = device;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use zenlite_types::{
    AfeConfigError, CommandResponse, Connectivity, ContactState, EegData, EegSampleRate,
    ImuConfigError, ImuMode, ImuSampleRate, PpgMode, PpgRawRegister, PpgReportRate, ScanResult,
    SysConfigError, SysInfo, SystemCommand,
};

use crate::transport::{
    Handle, Transport, TransportEvent, TransportReceiver, TransportSender, transport_channel,
};

/// A call made on the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCommand {
    StartScan,
    StopScan,
    Connect { uuid: String },
    Disconnect { handle: Handle },
    ConfigureAfe { handle: Handle, sample_rate: EegSampleRate },
    ConfigureImu { handle: Handle, sample_rate: ImuSampleRate, mode: ImuMode },
    ConfigurePpg {
        handle: Handle,
        report_rate: PpgReportRate,
        mode: PpgMode,
        raw_register: PpgRawRegister,
        raw_value: i32,
    },
    Pair { handle: Handle, in_pairing_mode: bool },
    SystemCommand { handle: Handle, command: SystemCommand },
    SetDeviceName { handle: Handle, name: String },
    SetSleepIdleTime { handle: Handle, seconds: i32 },
    SetSleepMode { handle: Handle, enabled: bool },
    GetSystemInfo { handle: Handle },
}

/// Live values served by the property reads of one handle.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveProperties {
    pub connectivity: Connectivity,
    pub contact_state: ContactState,
    pub battery_level: u8,
    pub hardware_revision: Option<String>,
    pub firmware_revision: Option<String>,
}

impl Default for LiveProperties {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Connecting,
            contact_state: ContactState::Unknown,
            battery_level: 90,
            hardware_revision: Some("1.0".to_string()),
            firmware_revision: Some("1.2.0".to_string()),
        }
    }
}

/// Runs inside the next `connect` call, after its handle is allocated.
type ConnectHook = Box<dyn FnOnce(&MockTransport, &ScanResult) + Send>;

struct Bound {
    uuid: String,
    properties: LiveProperties,
}

/// A scriptable [`Transport`].
pub struct MockTransport {
    sender: TransportSender,
    next_id: AtomicU32,
    next_handle: AtomicU64,
    scanning: AtomicBool,
    auto_respond: AtomicBool,
    refuse_connect: AtomicBool,
    next_result: Mutex<Option<i32>>,
    scan_error: Mutex<Option<i32>>,
    devices: Mutex<Vec<ScanResult>>,
    bound: Mutex<HashMap<Handle, Bound>>,
    commands: Mutex<Vec<MockCommand>>,
    connect_hook: Mutex<Option<ConnectHook>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("scanning", &self.scanning.load(Ordering::Relaxed))
            .field("auto_respond", &self.auto_respond.load(Ordering::Relaxed))
            .field("bound", &lock(&self.bound).len())
            .finish()
    }
}

impl MockTransport {
    /// Create a mock with auto-response enabled, plus its event receiver.
    pub fn new() -> (Self, TransportReceiver) {
        MockTransportBuilder::new().build()
    }

    /// Add a device reported by every scan.
    pub fn add_device(&self, device: ScanResult) {
        lock(&self.devices).push(device);
    }

    /// Add a device with a random uuid and address, returning it.
    pub fn add_random_device(&self) -> ScanResult {
        let device = random_device();
        self.add_device(device.clone());
        device
    }

    /// Answer commands automatically (default) or leave it to the test.
    pub fn set_auto_respond(&self, enabled: bool) {
        self.auto_respond.store(enabled, Ordering::Relaxed);
    }

    /// Make the next command call return `code` instead of an id.
    pub fn fail_next_command(&self, code: i32) {
        *lock(&self.next_result) = Some(code);
    }

    /// Make `start_scan` return `code` until cleared with `None`.
    pub fn set_scan_error(&self, code: Option<i32>) {
        *lock(&self.scan_error) = code;
    }

    /// Make `connect` return no handle.
    pub fn set_refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::Relaxed);
    }

    /// Run `hook` inside the next `connect`, just before it returns.
    ///
    /// Lets a test deliver events while the caller is still waiting on the
    /// transport.
    pub fn on_next_connect(
        &self,
        hook: impl FnOnce(&MockTransport, &ScanResult) + Send + 'static,
    ) {
        *lock(&self.connect_hook) = Some(Box::new(hook));
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Relaxed)
    }

    /// Every call made so far.
    pub fn commands(&self) -> Vec<MockCommand> {
        lock(&self.commands).clone()
    }

    /// Forget recorded calls.
    pub fn clear_commands(&self) {
        lock(&self.commands).clear();
    }

    /// Id the next accepted command will receive.
    pub fn peek_next_id(&self) -> u32 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Update the live properties of a handle.
    pub fn update_properties(&self, handle: Handle, f: impl FnOnce(&mut LiveProperties)) {
        if let Some(bound) = lock(&self.bound).get_mut(&handle) {
            f(&mut bound.properties);
        }
    }

    /// Push an event onto the transport channel.
    pub fn emit(&self, event: TransportEvent) {
        // The receiver may already be gone at shutdown.
        let _ = self.sender.send(event);
    }

    /// Report a connectivity change.
    pub fn emit_connectivity(&self, uuid: &str, state: Connectivity) {
        self.emit(TransportEvent::ConnectivityChanged {
            uuid: uuid.to_string(),
            state,
        });
    }

    /// Report an EEG batch.
    pub fn emit_eeg(&self, uuid: &str, sequence_num: i32, sample_rate: f32, samples: Vec<f32>) {
        self.emit(TransportEvent::Eeg {
            uuid: uuid.to_string(),
            data: EegData {
                sequence_num,
                sample_rate,
                samples,
            },
        });
    }

    /// Answer a command.
    pub fn respond(&self, uuid: &str, id: u32, response: CommandResponse) {
        self.emit(TransportEvent::CommandResponse {
            uuid: uuid.to_string(),
            id,
            response,
        });
    }

    fn record(&self, command: MockCommand) {
        lock(&self.commands).push(command);
    }

    fn uuid_of(&self, handle: Handle) -> Option<String> {
        lock(&self.bound).get(&handle).map(|b| b.uuid.clone())
    }

    /// Allocate an id for a command, honouring injected failures and
    /// answering it when auto-response is on.
    fn accept(&self, handle: Handle, response: CommandResponse) -> i32 {
        if let Some(code) = lock(&self.next_result).take() {
            return code;
        }
        let Some(uuid) = self.uuid_of(handle) else {
            return zenlite_types::ErrorCode::DeviceNotConnected.as_raw();
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.auto_respond.load(Ordering::Relaxed) {
            self.respond(&uuid, id, response);
        }
        id as i32
    }

    fn property<R>(&self, handle: Handle, default: R, f: impl FnOnce(&LiveProperties) -> R) -> R {
        lock(&self.bound)
            .get(&handle)
            .map(|b| f(&b.properties))
            .unwrap_or(default)
    }
}

fn afe_ok() -> CommandResponse {
    CommandResponse::Afe {
        error: AfeConfigError::None,
    }
}

fn system_ok(command: SystemCommand) -> CommandResponse {
    CommandResponse::System {
        command,
        error: SysConfigError::None,
    }
}

impl Transport for MockTransport {
    fn start_scan(&self) -> i32 {
        self.record(MockCommand::StartScan);
        if let Some(code) = *lock(&self.scan_error) {
            return code;
        }
        self.scanning.store(true, Ordering::Relaxed);
        let devices = lock(&self.devices).clone();
        for device in devices {
            self.emit(TransportEvent::Found(device));
        }
        0
    }

    fn stop_scan(&self) {
        self.record(MockCommand::StopScan);
        self.scanning.store(false, Ordering::Relaxed);
    }

    fn connect(&self, device: &ScanResult) -> Option<Handle> {
        self.record(MockCommand::Connect {
            uuid: device.uuid.clone(),
        });
        if self.refuse_connect.load(Ordering::Relaxed) {
            return None;
        }

        let handle = Handle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut properties = LiveProperties::default();
        if self.auto_respond.load(Ordering::Relaxed) {
            properties.connectivity = Connectivity::Connected;
        }
        lock(&self.bound).insert(
            handle,
            Bound {
                uuid: device.uuid.clone(),
                properties,
            },
        );

        self.emit_connectivity(&device.uuid, Connectivity::Connecting);
        if self.auto_respond.load(Ordering::Relaxed) {
            self.emit_connectivity(&device.uuid, Connectivity::Connected);
        }
        let hook = lock(&self.connect_hook).take();
        if let Some(hook) = hook {
            hook(self, device);
        }
        Some(handle)
    }

    fn disconnect(&self, handle: Handle) {
        self.record(MockCommand::Disconnect { handle });
        let Some(uuid) = self.uuid_of(handle) else {
            return;
        };
        self.emit_connectivity(&uuid, Connectivity::Disconnecting);
        if self.auto_respond.load(Ordering::Relaxed) {
            lock(&self.bound).remove(&handle);
            self.emit_connectivity(&uuid, Connectivity::Disconnected);
        }
    }

    fn configure_afe(&self, handle: Handle, sample_rate: EegSampleRate) -> i32 {
        self.record(MockCommand::ConfigureAfe {
            handle,
            sample_rate,
        });
        self.accept(handle, afe_ok())
    }

    fn configure_imu(&self, handle: Handle, sample_rate: ImuSampleRate, mode: ImuMode) -> i32 {
        self.record(MockCommand::ConfigureImu {
            handle,
            sample_rate,
            mode,
        });
        self.accept(
            handle,
            CommandResponse::Imu {
                error: ImuConfigError::None,
            },
        )
    }

    fn configure_ppg(
        &self,
        handle: Handle,
        report_rate: PpgReportRate,
        mode: PpgMode,
        raw_register: PpgRawRegister,
        raw_value: i32,
    ) -> i32 {
        self.record(MockCommand::ConfigurePpg {
            handle,
            report_rate,
            mode,
            raw_register,
            raw_value,
        });
        self.accept(handle, afe_ok())
    }

    fn pair(&self, handle: Handle, in_pairing_mode: bool) -> i32 {
        self.record(MockCommand::Pair {
            handle,
            in_pairing_mode,
        });
        let command = if in_pairing_mode {
            SystemCommand::Pair
        } else {
            SystemCommand::ValidatePairInfo
        };
        self.accept(handle, system_ok(command))
    }

    fn send_system_command(&self, handle: Handle, command: SystemCommand) -> i32 {
        self.record(MockCommand::SystemCommand { handle, command });
        self.accept(handle, system_ok(command))
    }

    fn set_device_name(&self, handle: Handle, name: &str) -> i32 {
        self.record(MockCommand::SetDeviceName {
            handle,
            name: name.to_string(),
        });
        self.accept(handle, system_ok(SystemCommand::SetDeviceName))
    }

    fn set_sleep_idle_time(&self, handle: Handle, seconds: i32) -> i32 {
        self.record(MockCommand::SetSleepIdleTime { handle, seconds });
        self.accept(handle, system_ok(SystemCommand::SetSleepIdleTime))
    }

    fn set_sleep_mode(&self, handle: Handle, enabled: bool) -> i32 {
        self.record(MockCommand::SetSleepMode { handle, enabled });
        self.accept(handle, afe_ok())
    }

    fn get_system_info(&self, handle: Handle) -> i32 {
        self.record(MockCommand::GetSystemInfo { handle });
        let id = self.accept(handle, system_ok(SystemCommand::GetSystemInfo));
        if id > 0
            && self.auto_respond.load(Ordering::Relaxed)
            && let Some(uuid) = self.uuid_of(handle)
        {
            let firmware = self.firmware_revision(handle).unwrap_or_default();
            self.emit(TransportEvent::SysInfo {
                uuid,
                id: id as u32,
                info: SysInfo {
                    firmware_info: firmware,
                    hardware_errors: Vec::new(),
                    sleep_idle_time_sec: 0,
                    vibration_intensity: 50,
                },
            });
        }
        id
    }

    fn connectivity(&self, handle: Handle) -> Connectivity {
        self.property(handle, Connectivity::Disconnected, |p| p.connectivity)
    }

    fn contact_state(&self, handle: Handle) -> ContactState {
        self.property(handle, ContactState::Unknown, |p| p.contact_state)
    }

    fn battery_level(&self, handle: Handle) -> u8 {
        self.property(handle, 0, |p| p.battery_level)
    }

    fn hardware_revision(&self, handle: Handle) -> Option<String> {
        self.property(handle, None, |p| p.hardware_revision.clone())
    }

    fn firmware_revision(&self, handle: Handle) -> Option<String> {
        self.property(handle, None, |p| p.firmware_revision.clone())
    }
}

/// A scan result with a random uuid, address and signal strength.
pub fn random_device() -> ScanResult {
    let id = uuid::Uuid::new_v4();
    let address = rand::random::<u64>() & 0xFFFF_FFFF_FFFF;
    ScanResult::new(id.to_string(), format!("ZenLite-{:04X}", address & 0xFFFF))
        .with_address(address)
        .with_rssi(rand::random_range(-90.0..-40.0))
        .with_battery_level(rand::random_range(20..=100))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockTransportBuilder {
    auto_respond: bool,
    first_id: u32,
    devices: Vec<ScanResult>,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self {
            auto_respond: true,
            first_id: 1,
            devices: Vec::new(),
        }
    }
}

impl MockTransportBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands and confirm connects automatically.
    pub fn auto_respond(mut self, enabled: bool) -> Self {
        self.auto_respond = enabled;
        self
    }

    /// First correlation id handed out (at least 1).
    pub fn first_id(mut self, id: u32) -> Self {
        self.first_id = id.max(1);
        self
    }

    /// Add a discoverable device.
    pub fn device(mut self, device: ScanResult) -> Self {
        self.devices.push(device);
        self
    }

    /// Build the mock and its event receiver.
    pub fn build(self) -> (MockTransport, TransportReceiver) {
        let (sender, receiver) = transport_channel();
        let transport = MockTransport {
            sender,
            next_id: AtomicU32::new(self.first_id),
            next_handle: AtomicU64::new(1),
            scanning: AtomicBool::new(false),
            auto_respond: AtomicBool::new(self.auto_respond),
            refuse_connect: AtomicBool::new(false),
            next_result: Mutex::new(None),
            scan_error: Mutex::new(None),
            devices: Mutex::new(self.devices),
            bound: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            connect_hook: Mutex::new(None),
        };
        (transport, receiver)
    }
}
