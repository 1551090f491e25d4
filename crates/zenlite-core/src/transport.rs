//! The boundary to the native ZenLite transport.
//!
//! The transport performs discovery, connection and command transmission on
//! the radio. Downward it is a synchronous [`Transport`] trait: every command
//! returns immediately with a positive correlation id or a non-positive
//! error code. Upward it is a message boundary: the transport pushes typed
//! [`TransportEvent`]s into an unbounded channel from whatever thread the
//! native stack calls back on, and a single dispatcher loop drains it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use zenlite_types::{
    BrainWave, CommandResponse, Connectivity, ContactState, DeviceEvent, DeviceInfo, EegData,
    EegSampleRate, ErrorCode, HardwareError, ImuData, ImuMode, ImuSampleRate, Orientation,
    PpgData, PpgMode, PpgRawRegister, PpgReportRate, ScanResult, SleepReport, SleepStage, SysInfo,
    SystemCommand,
};

/// Opaque native handle for a connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(pub u64);

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// Synchronous command surface of the native transport.
///
/// Command methods return a positive correlation id when the command was
/// queued, or a non-positive [`ErrorCode`] value when it was refused. The
/// matching response arrives later as a [`TransportEvent::CommandResponse`]
/// (or [`TransportEvent::SysInfo`]) carrying the same id.
pub trait Transport: Send + Sync + 'static {
    /// Start discovery. Found devices arrive as [`TransportEvent::Found`].
    ///
    /// Returns zero when discovery started, or a negative error code.
    fn start_scan(&self) -> i32;

    /// Stop discovery.
    fn stop_scan(&self);

    /// Open a connection, returning `None` if no handle could be created.
    fn connect(&self, device: &ScanResult) -> Option<Handle>;

    /// Request a disconnect. Completion is reported by a connectivity event.
    fn disconnect(&self, handle: Handle);

    fn configure_afe(&self, handle: Handle, sample_rate: EegSampleRate) -> i32;

    fn configure_imu(&self, handle: Handle, sample_rate: ImuSampleRate, mode: ImuMode) -> i32;

    fn configure_ppg(
        &self,
        handle: Handle,
        report_rate: PpgReportRate,
        mode: PpgMode,
        raw_register: PpgRawRegister,
        raw_value: i32,
    ) -> i32;

    fn pair(&self, handle: Handle, in_pairing_mode: bool) -> i32;

    fn send_system_command(&self, handle: Handle, command: SystemCommand) -> i32;

    fn set_device_name(&self, handle: Handle, name: &str) -> i32;

    fn set_sleep_idle_time(&self, handle: Handle, seconds: i32) -> i32;

    fn set_sleep_mode(&self, handle: Handle, enabled: bool) -> i32;

    /// Query system information. Yields both a command response and a
    /// [`TransportEvent::SysInfo`] record under the same id.
    fn get_system_info(&self, handle: Handle) -> i32;

    /// Live connectivity as reported by the native stack.
    fn connectivity(&self, handle: Handle) -> Connectivity;

    /// Live electrode contact state.
    fn contact_state(&self, handle: Handle) -> ContactState;

    /// Live battery level, 0-100.
    fn battery_level(&self, handle: Handle) -> u8;

    fn hardware_revision(&self, handle: Handle) -> Option<String>;

    fn firmware_revision(&self, handle: Handle) -> Option<String>;

    /// Human-readable message for a transport code.
    fn error_message(&self, code: i32) -> String {
        ErrorCode::describe(code)
    }
}

/// An asynchronous event emitted by the transport.
///
/// Newer firmware reports more event categories, so the enum is
/// `#[non_exhaustive]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum TransportEvent {
    /// A device was found while scanning.
    Found(ScanResult),
    ConnectivityChanged {
        uuid: String,
        state: Connectivity,
    },
    ContactStateChanged {
        uuid: String,
        state: ContactState,
    },
    OrientationChanged {
        uuid: String,
        orientation: Orientation,
    },
    DeviceInfoReady {
        uuid: String,
        info: DeviceInfo,
    },
    HardwareError {
        uuid: String,
        error: HardwareError,
    },
    /// Generic device error carrying a transport code.
    Error {
        uuid: String,
        code: i32,
    },
    /// EEG signal quality dropped; the device starts lead-off detection.
    SignalQualityWarning {
        uuid: String,
        quality: i32,
    },
    Event {
        uuid: String,
        event: DeviceEvent,
    },
    Blink {
        uuid: String,
    },
    SleepReport {
        uuid: String,
        report: SleepReport,
    },
    SleepStage {
        uuid: String,
        stage: SleepStage,
        confidence: f32,
        drowsiness: f32,
    },
    Eeg {
        uuid: String,
        data: EegData,
    },
    Imu {
        uuid: String,
        data: ImuData,
    },
    Ppg {
        uuid: String,
        data: PpgData,
    },
    BrainWave {
        uuid: String,
        wave: BrainWave,
    },
    Stress {
        uuid: String,
        value: f32,
    },
    Meditation {
        uuid: String,
        value: f32,
    },
    /// Response to a previously submitted command.
    CommandResponse {
        uuid: String,
        id: u32,
        response: CommandResponse,
    },
    /// System information answering a [`Transport::get_system_info`] call.
    SysInfo {
        uuid: String,
        id: u32,
        info: SysInfo,
    },
}

impl TransportEvent {
    /// Device the event refers to; `None` for scan results.
    pub fn uuid(&self) -> Option<&str> {
        match self {
            Self::Found(_) => None,
            Self::ConnectivityChanged { uuid, .. }
            | Self::ContactStateChanged { uuid, .. }
            | Self::OrientationChanged { uuid, .. }
            | Self::DeviceInfoReady { uuid, .. }
            | Self::HardwareError { uuid, .. }
            | Self::Error { uuid, .. }
            | Self::SignalQualityWarning { uuid, .. }
            | Self::Event { uuid, .. }
            | Self::Blink { uuid }
            | Self::SleepReport { uuid, .. }
            | Self::SleepStage { uuid, .. }
            | Self::Eeg { uuid, .. }
            | Self::Imu { uuid, .. }
            | Self::Ppg { uuid, .. }
            | Self::BrainWave { uuid, .. }
            | Self::Stress { uuid, .. }
            | Self::Meditation { uuid, .. }
            | Self::CommandResponse { uuid, .. }
            | Self::SysInfo { uuid, .. } => Some(uuid),
        }
    }

    /// Short name of the event kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::ConnectivityChanged { .. } => "connectivity",
            Self::ContactStateChanged { .. } => "contact_state",
            Self::OrientationChanged { .. } => "orientation",
            Self::DeviceInfoReady { .. } => "device_info",
            Self::HardwareError { .. } => "hardware_error",
            Self::Error { .. } => "error",
            Self::SignalQualityWarning { .. } => "signal_quality",
            Self::Event { .. } => "event",
            Self::Blink { .. } => "blink",
            Self::SleepReport { .. } => "sleep_report",
            Self::SleepStage { .. } => "sleep_stage",
            Self::Eeg { .. } => "eeg",
            Self::Imu { .. } => "imu",
            Self::Ppg { .. } => "ppg",
            Self::BrainWave { .. } => "brain_wave",
            Self::Stress { .. } => "stress",
            Self::Meditation { .. } => "meditation",
            Self::CommandResponse { .. } => "command_response",
            Self::SysInfo { .. } => "sys_info",
        }
    }
}

/// Sender half handed to the transport.
pub type TransportSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half drained by the dispatcher.
pub type TransportReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the channel connecting a transport to a dispatcher.
pub fn transport_channel() -> (TransportSender, TransportReceiver) {
    mpsc::unbounded_channel()
}
