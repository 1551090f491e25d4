//! The session facade.
//!
//! A [`Session`] owns every piece of per-device state (registry, pending
//! commands, telemetry buffers, listeners) and exposes the caller-facing
//! operations. Commands are synchronous: they return the correlation id (or
//! a typed error) immediately and report their outcome later through the
//! supplied continuation. Inbound events are processed by the dispatcher
//! task started with [`Session::spawn_dispatcher`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use zenlite_core::{Channel, MockTransport, Session, SessionConfig, outcome_channel};
//! use zenlite_types::EegSampleRate;
//!
//! # async fn demo() -> zenlite_core::Result<()> {
//! let (transport, events) = MockTransport::new();
//! let device = transport.add_random_device();
//! let session = Arc::new(Session::new(transport, SessionConfig::default())?);
//! let cancel = CancellationToken::new();
//! session.spawn_dispatcher(events, cancel.clone());
//!
//! session.start_scan()?;
//! # tokio::task::yield_now().await;
//! session.connect(&device.uuid)?;
//!
//! let (done, outcome) = outcome_channel();
//! session.configure_afe(&device.uuid, EegSampleRate::Hz256, done)?;
//! println!("AFE: {:?}", outcome.await);
//!
//! if let Some(eeg) = session.snapshot(&device.uuid, Channel::Eeg) {
//!     println!("{} EEG samples", eeg.len());
//! }
//! cancel.cancel();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zenlite_types::{
    CommandKind, Connectivity, ContactState, EegSampleRate, ImuMode, ImuSampleRate, PpgMode,
    PpgRawRegister, PpgReportRate, SysInfo, SystemCommand,
};

use crate::buffer::{Channel, ChannelSnapshot, TelemetryStore};
use crate::config::SessionConfig;
use crate::correlator::{CommandCorrelator, CommandOutcome, CorrelationId, PendingSummary};
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, Error, Result};
use crate::events::{EventBus, EventReceiver};
use crate::listener::{Listener, ListenerTable};
use crate::metrics::{DispatchMetrics, DispatchMetricsSnapshot};
use crate::registry::{Device, DeviceRegistry, Reading};
use crate::transport::{Handle, Transport, TransportEvent, TransportReceiver};

/// Shortest non-zero automatic sleep delay accepted by the device.
pub const MIN_SLEEP_IDLE_SECS: i32 = 30;

/// A continuation that forwards the outcome to a oneshot channel.
///
/// The receiver yields an error only if the session is dropped with the
/// command still pending.
pub fn outcome_channel() -> (
    impl FnOnce(CommandOutcome) + Send + 'static,
    oneshot::Receiver<CommandOutcome>,
) {
    let (tx, rx) = oneshot::channel();
    (
        move |outcome| {
            // The caller may have stopped waiting.
            let _ = tx.send(outcome);
        },
        rx,
    )
}

/// Session over a [`Transport`].
pub struct Session<T: Transport> {
    config: SessionConfig,
    dispatcher: Dispatcher<T>,
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl<T: Transport> Session<T> {
    /// Create a session after validating `config`.
    pub fn new(transport: T, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(DispatchMetrics::new());
        let dispatcher = Dispatcher {
            transport: Arc::new(transport),
            registry: Arc::new(DeviceRegistry::new()),
            correlator: Arc::new(CommandCorrelator::new(Arc::clone(&metrics))),
            telemetry: Arc::new(TelemetryStore::new(config.windows.clone())),
            listeners: Arc::new(ListenerTable::new()),
            events: EventBus::new(config.event_capacity),
            metrics,
        };
        Ok(Self { config, dispatcher })
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.dispatcher.transport
    }

    // --- discovery and connection ---

    /// Start discovery. Results arrive as
    /// [`SessionEvent::Discovered`](crate::SessionEvent::Discovered).
    pub fn start_scan(&self) -> Result<()> {
        let code = self.transport().start_scan();
        if code < 0 {
            return Err(self.transport_error(code));
        }
        info!("Scanning for devices");
        Ok(())
    }

    /// Stop discovery.
    pub fn stop_scan(&self) {
        self.transport().stop_scan();
        debug!("Scan stopped");
    }

    /// Connect to a discovered device.
    ///
    /// Stops any running scan first. Only allowed while the device is
    /// disconnected; the connection completes when the transport reports
    /// [`Connectivity::Connected`].
    pub fn connect(&self, uuid: &str) -> Result<Handle> {
        self.transport().stop_scan();
        let registry = &self.dispatcher.registry;
        let scan = registry.begin_connect(uuid)?;

        let Some(handle) = self.transport().connect(&scan) else {
            registry.abort_connect(uuid);
            warn!("Transport returned no handle for {}", uuid);
            return Err(Error::ConnectionFailed(uuid.to_string()));
        };

        // The dispatcher may have applied a disconnect while the transport
        // call was running; the handle is then already dead.
        if let Err(e) = registry.complete_connect(uuid, handle) {
            warn!("Dropping {} for {}: {}", handle, uuid, e);
            self.transport().disconnect(handle);
            if matches!(e, Error::HandleAlreadyBound(_)) {
                registry.abort_connect(uuid);
            }
            return Err(e);
        }
        info!("Connecting to {} ({})", uuid, handle);
        Ok(handle)
    }

    /// Disconnect a device.
    ///
    /// The device moves to `Disconnecting` immediately; its handle is
    /// released and its pending commands cancelled when the transport
    /// confirms with `Disconnected`.
    pub fn disconnect(&self, uuid: &str) -> Result<()> {
        let handle = self.dispatcher.registry.begin_disconnect(uuid)?;
        if let Some(handle) = handle {
            self.transport().disconnect(handle);
        }
        info!("Disconnecting from {}", uuid);
        Ok(())
    }

    // --- commands ---

    /// Configure the EEG front end.
    pub fn configure_afe(
        &self,
        uuid: &str,
        sample_rate: EegSampleRate,
        on_done: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> Result<CorrelationId> {
        self.command(uuid, CommandKind::AfeConfig, on_done, |t, h| {
            t.configure_afe(h, sample_rate)
        })
    }

    /// Configure the IMU.
    pub fn configure_imu(
        &self,
        uuid: &str,
        sample_rate: ImuSampleRate,
        mode: ImuMode,
        on_done: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> Result<CorrelationId> {
        self.command(uuid, CommandKind::ImuConfig, on_done, |t, h| {
            t.configure_imu(h, sample_rate, mode)
        })
    }

    /// Configure the PPG sensor.
    pub fn configure_ppg(
        &self,
        uuid: &str,
        report_rate: PpgReportRate,
        mode: PpgMode,
        raw_register: PpgRawRegister,
        raw_value: i32,
        on_done: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> Result<CorrelationId> {
        self.command(uuid, CommandKind::PpgConfig, on_done, |t, h| {
            t.configure_ppg(h, report_rate, mode, raw_register, raw_value)
        })
    }

    /// Pair with a device.
    ///
    /// `None` uses the pairing-mode flag from the device's last
    /// advertisement: a device in pairing mode accepts a new pairing, any
    /// other device validates a stored one.
    pub fn pair(
        &self,
        uuid: &str,
        in_pairing_mode: Option<bool>,
        on_done: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> Result<CorrelationId> {
        let device = self.device(uuid)?;
        let in_pairing_mode = in_pairing_mode.unwrap_or(device.in_pairing_mode);
        self.command(uuid, CommandKind::Pair, on_done, |t, h| {
            t.pair(h, in_pairing_mode)
        })
    }

    /// Send a raw system command.
    pub fn send_system_command(
        &self,
        uuid: &str,
        command: SystemCommand,
        on_done: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> Result<CorrelationId> {
        self.command(uuid, CommandKind::SystemCommand, on_done, |t, h| {
            t.send_system_command(h, command)
        })
    }

    /// Rename a device.
    pub fn set_device_name(
        &self,
        uuid: &str,
        name: &str,
        on_done: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> Result<CorrelationId> {
        self.command(uuid, CommandKind::Rename, on_done, |t, h| {
            t.set_device_name(h, name)
        })
    }

    /// Set the idle delay before the device sleeps.
    ///
    /// Zero disables automatic sleep; other values must be at least
    /// [`MIN_SLEEP_IDLE_SECS`].
    pub fn set_sleep_idle_time(
        &self,
        uuid: &str,
        seconds: i32,
        on_done: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> Result<CorrelationId> {
        if seconds != 0 && seconds < MIN_SLEEP_IDLE_SECS {
            return Err(Error::invalid_config(format!(
                "sleep idle time must be 0 or at least {} seconds, got {}",
                MIN_SLEEP_IDLE_SECS, seconds
            )));
        }
        self.command(uuid, CommandKind::SleepIdle, on_done, |t, h| {
            t.set_sleep_idle_time(h, seconds)
        })
    }

    /// Enable or disable sleep monitoring.
    pub fn set_sleep_mode(
        &self,
        uuid: &str,
        enabled: bool,
        on_done: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> Result<CorrelationId> {
        self.command(uuid, CommandKind::SleepMode, on_done, |t, h| {
            t.set_sleep_mode(h, enabled)
        })
    }

    /// Query system information.
    ///
    /// `on_done` receives the command outcome; `on_info` receives the
    /// system information record if the device sends one.
    pub fn get_system_info(
        &self,
        uuid: &str,
        on_done: impl FnOnce(CommandOutcome) + Send + 'static,
        on_info: impl FnOnce(SysInfo) + Send + 'static,
    ) -> Result<CorrelationId> {
        let handle = self.bound_handle(uuid)?;
        let transport = self.transport();
        self.dispatcher
            .correlator
            .issue_query(uuid, || transport.get_system_info(handle), on_done, on_info)
            .map_err(|e| self.with_transport_message(e))
    }

    fn command(
        &self,
        uuid: &str,
        kind: CommandKind,
        on_done: impl FnOnce(CommandOutcome) + Send + 'static,
        call: impl FnOnce(&T, Handle) -> i32,
    ) -> Result<CorrelationId> {
        let handle = self.bound_handle(uuid)?;
        let transport = self.transport();
        self.dispatcher
            .correlator
            .issue(uuid, kind, || call(transport, handle), on_done)
            .map_err(|e| self.with_transport_message(e))
    }

    fn bound_handle(&self, uuid: &str) -> Result<Handle> {
        let registry = &self.dispatcher.registry;
        match registry.handle_for(uuid) {
            Some(handle) => Ok(handle),
            None if registry.contains(uuid) => Err(Error::not_connected(uuid)),
            None => Err(Error::device_not_found(uuid)),
        }
    }

    fn transport_error(&self, code: i32) -> Error {
        Error::Transport {
            code,
            message: self.transport().error_message(code),
        }
    }

    fn with_transport_message(&self, error: Error) -> Error {
        match error {
            Error::Transport { code, .. } => self.transport_error(code),
            other => other,
        }
    }

    /// Outstanding commands of a device, oldest first.
    pub fn pending_commands(&self, uuid: &str) -> Vec<PendingSummary> {
        self.dispatcher.correlator.pending_for(uuid)
    }

    // --- devices and two-tier reads ---

    /// A copy of a device record.
    pub fn device(&self, uuid: &str) -> Result<Device> {
        self.dispatcher
            .registry
            .get(uuid)
            .ok_or_else(|| Error::device_not_found(uuid))
    }

    /// Every known device, sorted by uuid.
    pub fn devices(&self) -> Vec<Device> {
        let registry = &self.dispatcher.registry;
        registry
            .device_ids()
            .iter()
            .filter_map(|id| registry.get(id))
            .collect()
    }

    /// Read live from the transport while a handle is bound, else fall back.
    fn two_tier<R>(
        &self,
        uuid: &str,
        live: impl FnOnce(&T, Handle) -> R,
        cached: impl FnOnce(&Device) -> R,
    ) -> Result<Reading<R>> {
        let device = self.device(uuid)?;
        Ok(match device.handle {
            Some(handle) => Reading::live(live(self.transport(), handle)),
            None => Reading::cached(cached(&device)),
        })
    }

    /// Battery level; the advertised level when not connected.
    pub fn battery_level(&self, uuid: &str) -> Result<Reading<u8>> {
        self.two_tier(
            uuid,
            |t, h| t.battery_level(h),
            |d| d.broadcast_battery_level,
        )
    }

    /// Connectivity; the last reported state when not connected.
    pub fn connectivity(&self, uuid: &str) -> Result<Reading<Connectivity>> {
        self.two_tier(uuid, |t, h| t.connectivity(h), Device::connectivity)
    }

    /// Contact state; unknown when not connected.
    pub fn contact_state(&self, uuid: &str) -> Result<Reading<ContactState>> {
        self.two_tier(uuid, |t, h| t.contact_state(h), |_| ContactState::Unknown)
    }

    /// Hardware revision; `None` when not connected.
    pub fn hardware_revision(&self, uuid: &str) -> Result<Reading<Option<String>>> {
        self.two_tier(uuid, |t, h| t.hardware_revision(h), |_| None)
    }

    /// Firmware revision; `None` when not connected.
    pub fn firmware_revision(&self, uuid: &str) -> Result<Reading<Option<String>>> {
        self.two_tier(uuid, |t, h| t.firmware_revision(h), |_| None)
    }

    // --- listeners and telemetry ---

    /// Route a device's events to `listener`, replacing any previous one.
    pub fn set_listener(&self, uuid: &str, listener: Arc<dyn Listener>) {
        self.dispatcher.listeners.set(uuid, listener);
    }

    /// Stop routing a device's events.
    pub fn clear_listener(&self, uuid: &str) {
        self.dispatcher.listeners.clear(uuid);
    }

    /// Copy of one telemetry channel, `None` until it receives data.
    pub fn snapshot(&self, uuid: &str, channel: Channel) -> Option<ChannelSnapshot> {
        self.dispatcher.telemetry.snapshot(uuid, channel)
    }

    /// Channels of a device that have received data.
    pub fn channels(&self, uuid: &str) -> Vec<Channel> {
        self.dispatcher.telemetry.present_channels(uuid)
    }

    /// Discard a device's buffered telemetry.
    pub fn clear_telemetry(&self, uuid: &str) {
        self.dispatcher.telemetry.clear(uuid);
    }

    /// The telemetry store, for consumers that sample many channels.
    pub fn telemetry(&self) -> &TelemetryStore {
        &self.dispatcher.telemetry
    }

    // --- events and background tasks ---

    /// Subscribe to session events.
    pub fn subscribe(&self) -> EventReceiver {
        self.dispatcher.events.subscribe()
    }

    /// Route one transport event synchronously.
    pub fn dispatch(&self, event: TransportEvent) -> std::result::Result<(), DispatchError> {
        self.dispatcher.dispatch(event)
    }

    /// Start the dispatcher task draining `receiver`.
    pub fn spawn_dispatcher(
        &self,
        receiver: TransportReceiver,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        self.dispatcher.clone().spawn(receiver, cancel)
    }

    /// Start the task expiring commands older than the configured timeout.
    ///
    /// Returns `None` when no command timeout is configured.
    pub fn spawn_command_sweeper(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let timeout = self.config.command_timeout_duration()?;
        let period = self.config.sweep_interval_duration();
        let correlator = Arc::clone(&self.dispatcher.correlator);

        Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Command sweeper cancelled, shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let expired = correlator.expire(timeout);
                        if expired > 0 {
                            debug!("Command sweeper expired {} command(s)", expired);
                        }
                    }
                }
            }
        }))
    }

    /// Current dispatch counters.
    pub fn metrics(&self) -> DispatchMetricsSnapshot {
        self.dispatcher.metrics.snapshot()
    }

    /// Zero the dispatch counters, returning their last values.
    ///
    /// Useful for rate reporting: sample and reset once per period.
    pub fn reset_metrics(&self) -> DispatchMetricsSnapshot {
        let last = self.dispatcher.metrics.snapshot();
        self.dispatcher.metrics.reset();
        last
    }

    /// Whether the system-information record of query `id` is still expected.
    pub fn awaiting_sys_info(&self, id: CorrelationId) -> bool {
        self.dispatcher.correlator.awaiting_sys_info(id)
    }
}
