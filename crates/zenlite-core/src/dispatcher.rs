//! Routing of inbound transport events.
//!
//! A single [`Dispatcher`] drains the transport channel and sends every
//! event where it belongs:
//!
//! - scan results upsert the registry and are broadcast as discoveries;
//! - status events (connectivity, contact, orientation, device info, errors,
//!   device events, sleep reports and stages) go to the device's listener;
//! - streaming events (EEG, IMU, PPG, brain wave, stress, meditation) are
//!   buffered and then handed to the listener;
//! - command responses and sys-info records resolve the correlator.
//!
//! Events naming a device the registry has never seen are dispatch
//! anomalies: counted, logged and broadcast, then dropped.
//!
//! No session lock is held while a listener or continuation runs.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zenlite_types::{Connectivity, ScanResult};

use crate::buffer::TelemetryStore;
use crate::correlator::CommandCorrelator;
use crate::error::DispatchError;
use crate::events::{EventBus, SessionEvent};
use crate::listener::ListenerTable;
use crate::metrics::DispatchMetrics;
use crate::registry::DeviceRegistry;
use crate::transport::{Transport, TransportEvent, TransportReceiver};

/// Routes [`TransportEvent`]s to the session components.
///
/// Cloning is cheap; clones share every component.
pub struct Dispatcher<T: Transport> {
    pub(crate) transport: Arc<T>,
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) correlator: Arc<CommandCorrelator>,
    pub(crate) telemetry: Arc<TelemetryStore>,
    pub(crate) listeners: Arc<ListenerTable>,
    pub(crate) events: EventBus,
    pub(crate) metrics: Arc<DispatchMetrics>,
}

impl<T: Transport> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
            correlator: Arc::clone(&self.correlator),
            telemetry: Arc::clone(&self.telemetry),
            listeners: Arc::clone(&self.listeners),
            events: self.events.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("devices", &self.registry.len())
            .field("pending", &self.correlator.pending_count())
            .finish()
    }
}

impl<T: Transport> Dispatcher<T> {
    /// Route one event.
    ///
    /// Unknown devices yield a [`DispatchError`] after the anomaly has been
    /// counted, logged and broadcast; the caller may ignore it.
    pub fn dispatch(&self, event: TransportEvent) -> Result<(), DispatchError> {
        self.metrics.record_dispatched();

        let uuid = match event.uuid() {
            Some(uuid) => uuid.to_string(),
            None => {
                if let TransportEvent::Found(result) = event {
                    self.on_found(result);
                }
                return Ok(());
            }
        };

        if !self.registry.contains(&uuid) {
            let error = DispatchError::UnknownDevice {
                uuid,
                event: event.kind(),
            };
            self.metrics.record_anomaly();
            warn!("Dropping event: {}", error);
            self.events.send(SessionEvent::anomaly(&error));
            return Err(error);
        }

        match event {
            TransportEvent::Found(_) => {}
            TransportEvent::ConnectivityChanged { state, .. } => {
                self.metrics.record_status();
                self.on_connectivity(&uuid, state);
            }
            TransportEvent::ContactStateChanged { state, .. } => {
                self.metrics.record_status();
                self.listeners
                    .notify(&uuid, |l| l.on_contact_state_change(&uuid, state));
            }
            TransportEvent::OrientationChanged { orientation, .. } => {
                self.metrics.record_status();
                self.listeners
                    .notify(&uuid, |l| l.on_orientation_change(&uuid, orientation));
            }
            TransportEvent::DeviceInfoReady { info, .. } => {
                self.metrics.record_status();
                debug!("Device info for {}: firmware {}", uuid, info.firmware);
                self.listeners
                    .notify(&uuid, |l| l.on_device_info_ready(&uuid, &info));
            }
            TransportEvent::HardwareError { error, .. } => {
                self.metrics.record_status();
                warn!("Hardware error on {}: {}", uuid, error);
                self.listeners
                    .notify(&uuid, |l| l.on_hardware_error(&uuid, error));
            }
            TransportEvent::Error { code, .. } => {
                self.metrics.record_status();
                let message = self.transport.error_message(code);
                warn!("Device {} reported error {}: {}", uuid, code, message);
                self.listeners
                    .notify(&uuid, |l| l.on_error(&uuid, code, &message));
            }
            TransportEvent::SignalQualityWarning { quality, .. } => {
                self.metrics.record_status();
                debug!("Signal quality warning on {}: {}", uuid, quality);
                self.listeners
                    .notify(&uuid, |l| l.on_signal_quality_warning(&uuid, quality));
            }
            TransportEvent::Event { event, .. } => {
                self.metrics.record_status();
                self.listeners.notify(&uuid, |l| l.on_event(&uuid, event));
            }
            TransportEvent::Blink { .. } => {
                self.metrics.record_status();
                self.listeners.notify(&uuid, |l| l.on_blink(&uuid));
            }
            TransportEvent::SleepReport { report, .. } => {
                self.metrics.record_status();
                self.listeners
                    .notify(&uuid, |l| l.on_sleep_report(&uuid, &report));
            }
            TransportEvent::SleepStage {
                stage,
                confidence,
                drowsiness,
                ..
            } => {
                self.metrics.record_status();
                let received_at = unix_time_now();
                self.telemetry.ingest(&uuid, "sleep stage", |t| {
                    t.ingest_sleep_stage(received_at, stage, confidence, drowsiness)
                });
                self.listeners.notify(&uuid, |l| {
                    l.on_sleep_stage(&uuid, stage, confidence, drowsiness)
                });
            }
            TransportEvent::Eeg { data, .. } => {
                self.metrics.record_streaming();
                self.telemetry.ingest(&uuid, "EEG", |t| t.ingest_eeg(&data));
                self.listeners.notify(&uuid, |l| l.on_eeg_data(&uuid, &data));
            }
            TransportEvent::Imu { data, .. } => {
                self.metrics.record_streaming();
                self.telemetry.ingest(&uuid, "IMU", |t| t.ingest_imu(&data));
                self.listeners.notify(&uuid, |l| l.on_imu_data(&uuid, &data));
            }
            TransportEvent::Ppg { data, .. } => {
                self.metrics.record_streaming();
                self.telemetry.ingest(&uuid, "PPG", |t| t.ingest_ppg(&data));
                self.listeners.notify(&uuid, |l| l.on_ppg_data(&uuid, &data));
            }
            TransportEvent::BrainWave { wave, .. } => {
                self.metrics.record_streaming();
                self.listeners.notify(&uuid, |l| l.on_brain_wave(&uuid, &wave));
            }
            TransportEvent::Stress { value, .. } => {
                self.metrics.record_streaming();
                self.telemetry
                    .ingest(&uuid, "stress", |t| t.ingest_stress(value));
                self.listeners.notify(&uuid, |l| l.on_stress(&uuid, value));
            }
            TransportEvent::Meditation { value, .. } => {
                self.metrics.record_streaming();
                self.telemetry
                    .ingest(&uuid, "meditation", |t| t.ingest_meditation(value));
                self.listeners.notify(&uuid, |l| l.on_meditation(&uuid, value));
            }
            TransportEvent::CommandResponse { id, response, .. } => {
                self.metrics.record_response();
                self.correlator.resolve(&uuid, id, response);
            }
            TransportEvent::SysInfo { id, info, .. } => {
                self.metrics.record_response();
                for error in &info.hardware_errors {
                    self.listeners
                        .notify(&uuid, |l| l.on_hardware_error(&uuid, *error));
                }
                self.correlator.resolve_sys_info(&uuid, id, info);
            }
        }
        Ok(())
    }

    fn on_found(&self, result: ScanResult) {
        self.metrics.record_status();
        let new = !self.registry.contains(&result.uuid);
        let device = self.registry.upsert(&result);
        self.events.send(SessionEvent::Discovered {
            uuid: device.uuid,
            name: device.name,
            rssi: device.rssi,
            new,
        });
    }

    fn on_connectivity(&self, uuid: &str, state: Connectivity) {
        let update = match self.registry.apply_connectivity(uuid, state) {
            Ok(update) => update,
            Err(e) => {
                warn!("Ignoring connectivity event for {}: {}", uuid, e);
                return;
            }
        };
        let transition = update.transition;

        if transition.is_change() {
            info!("Device {} {} -> {}", uuid, transition.from, transition.to);
        }
        if let Some(handle) = update.released {
            debug!("Released {} of {}", handle, uuid);
        }
        // A released handle means the link is gone even when the recorded
        // state was already `Disconnected`.
        if update.released.is_some() || transition.entered(Connectivity::Disconnected) {
            self.telemetry.mark_stale(uuid);
            let cancelled = self.correlator.cancel_device(uuid);
            if cancelled > 0 {
                self.events.send(SessionEvent::CommandsCancelled {
                    uuid: uuid.to_string(),
                    count: cancelled,
                });
            }
        }
        if transition.is_change() {
            self.events.send(SessionEvent::ConnectivityChanged {
                uuid: uuid.to_string(),
                from: transition.from,
                to: transition.to,
            });
        }

        self.listeners
            .notify(uuid, |l| l.on_connectivity_change(uuid, state));
    }

    /// Drain `receiver` until it closes or `cancel` fires.
    pub async fn run(self, mut receiver: TransportReceiver, cancel: CancellationToken) {
        info!("Dispatcher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Dispatcher cancelled, shutting down");
                    break;
                }
                event = receiver.recv() => {
                    match event {
                        Some(event) => {
                            // Anomalies are already reported by dispatch.
                            let _ = self.dispatch(event);
                        }
                        None => {
                            info!("Transport channel closed, dispatcher exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Run the dispatcher on a new task.
    pub fn spawn(self, receiver: TransportReceiver, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver, cancel))
    }
}

/// Current wall-clock time as fractional unix seconds.
fn unix_time_now() -> f64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    nanos as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use zenlite_types::{AfeConfigError, CommandKind, CommandResponse, EegData, SleepStage};

    use crate::buffer::Channel;
    use crate::config::WindowConfig;
    use crate::correlator::CommandOutcome;
    use crate::listener::Listener;
    use crate::mock::MockTransport;
    use crate::transport::{Handle, transport_channel};

    fn dispatcher() -> Dispatcher<MockTransport> {
        let metrics = Arc::new(DispatchMetrics::new());
        Dispatcher {
            transport: Arc::new(MockTransport::new().0),
            registry: Arc::new(DeviceRegistry::new()),
            correlator: Arc::new(CommandCorrelator::new(Arc::clone(&metrics))),
            telemetry: Arc::new(TelemetryStore::new(WindowConfig::default())),
            listeners: Arc::new(ListenerTable::new()),
            events: EventBus::default(),
            metrics,
        }
    }

    fn ok_response() -> CommandResponse {
        CommandResponse::Afe {
            error: AfeConfigError::None,
        }
    }

    fn found(uuid: &str) -> TransportEvent {
        TransportEvent::Found(ScanResult::new(uuid, "ZenLite").with_battery_level(80))
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Listener for Recorder {
        fn on_connectivity_change(&self, uuid: &str, state: Connectivity) {
            self.push(format!("connectivity:{uuid}:{state}"));
        }

        fn on_eeg_data(&self, uuid: &str, data: &EegData) {
            self.push(format!("eeg:{uuid}:{}", data.samples.len()));
        }

        fn on_error(&self, uuid: &str, code: i32, message: &str) {
            self.push(format!("error:{uuid}:{code}:{message}"));
        }

        fn on_sleep_stage(&self, uuid: &str, stage: SleepStage, _: f32, _: f32) {
            self.push(format!("sleep:{uuid}:{stage}"));
        }
    }

    #[tokio::test]
    async fn test_found_upserts_and_broadcasts() {
        let d = dispatcher();
        let mut rx = d.events.subscribe();

        d.dispatch(found("zl-1")).unwrap();
        d.dispatch(found("zl-1")).unwrap();

        assert_eq!(d.registry.len(), 1);
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, SessionEvent::Discovered { new: true, .. }));
        assert!(matches!(second, SessionEvent::Discovered { new: false, .. }));
    }

    #[tokio::test]
    async fn test_unknown_device_is_an_anomaly() {
        let d = dispatcher();
        let mut rx = d.events.subscribe();

        let err = d
            .dispatch(TransportEvent::Blink {
                uuid: "ghost".into(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnknownDevice {
                uuid: "ghost".into(),
                event: "blink",
            }
        );
        assert_eq!(d.metrics.snapshot().anomalies, 1);
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::DispatchAnomaly { .. }
        ));
    }

    #[test]
    fn test_streaming_is_buffered_then_delivered() {
        let d = dispatcher();
        let recorder = Arc::new(Recorder::default());
        d.dispatch(found("zl-1")).unwrap();
        d.listeners.set("zl-1", recorder.clone());

        d.dispatch(TransportEvent::Eeg {
            uuid: "zl-1".into(),
            data: EegData {
                sequence_num: 1,
                sample_rate: 256.0,
                samples: vec![1.0, 2.0, 3.0],
            },
        })
        .unwrap();

        assert_eq!(recorder.calls(), vec!["eeg:zl-1:3"]);
        let snap = d.telemetry.snapshot("zl-1", Channel::Eeg).unwrap();
        assert_eq!(snap.axes[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(d.metrics.snapshot().streaming_events, 1);
    }

    #[test]
    fn test_brain_wave_is_not_buffered() {
        let d = dispatcher();
        d.dispatch(found("zl-1")).unwrap();
        d.dispatch(TransportEvent::BrainWave {
            uuid: "zl-1".into(),
            wave: Default::default(),
        })
        .unwrap();
        assert!(d.telemetry.present_channels("zl-1").is_empty());
    }

    #[test]
    fn test_error_event_carries_message() {
        let d = dispatcher();
        let recorder = Arc::new(Recorder::default());
        d.dispatch(found("zl-1")).unwrap();
        d.listeners.set("zl-1", recorder.clone());

        d.dispatch(TransportEvent::Error {
            uuid: "zl-1".into(),
            code: -160,
        })
        .unwrap();

        assert_eq!(
            recorder.calls(),
            vec!["error:zl-1:-160:Device is not connected"]
        );
    }

    #[test]
    fn test_sleep_stage_recorded_and_delivered() {
        let d = dispatcher();
        let recorder = Arc::new(Recorder::default());
        d.dispatch(found("zl-1")).unwrap();
        d.listeners.set("zl-1", recorder.clone());

        d.dispatch(TransportEvent::SleepStage {
            uuid: "zl-1".into(),
            stage: SleepStage::Deep,
            confidence: 0.9,
            drowsiness: 0.2,
        })
        .unwrap();

        assert_eq!(recorder.calls(), vec!["sleep:zl-1:deep"]);
        let snap = d.telemetry.snapshot("zl-1", Channel::SleepStage).unwrap();
        assert_eq!(snap.axes[1], vec![3.0]);
        assert!(snap.axes[0][0] > 1_600_000_000.0);
    }

    #[tokio::test]
    async fn test_disconnect_releases_cancels_and_marks_stale() {
        let d = dispatcher();
        let recorder = Arc::new(Recorder::default());
        let mut rx = d.events.subscribe();
        d.dispatch(found("zl-1")).unwrap();
        d.listeners.set("zl-1", recorder.clone());
        d.registry.bind_handle("zl-1", Handle(1)).unwrap();
        d.dispatch(TransportEvent::ConnectivityChanged {
            uuid: "zl-1".into(),
            state: Connectivity::Connected,
        })
        .unwrap();
        d.dispatch(TransportEvent::Stress {
            uuid: "zl-1".into(),
            value: 30.0,
        })
        .unwrap();

        let outcome = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&outcome);
        d.correlator
            .submit("zl-1", CommandKind::Pair, 7, move |o| {
                *sink.lock().unwrap() = Some(o);
            })
            .unwrap();

        d.dispatch(TransportEvent::ConnectivityChanged {
            uuid: "zl-1".into(),
            state: Connectivity::Disconnected,
        })
        .unwrap();

        assert_eq!(d.registry.handle_for("zl-1"), None);
        assert_eq!(*outcome.lock().unwrap(), Some(CommandOutcome::Cancelled));
        assert!(d.telemetry.snapshot("zl-1", Channel::Stress).unwrap().stale);
        assert_eq!(
            recorder.calls(),
            vec!["connectivity:zl-1:connected", "connectivity:zl-1:disconnected"]
        );

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&SessionEvent::CommandsCancelled {
            uuid: "zl-1".into(),
            count: 1,
        }));
        assert!(seen.contains(&SessionEvent::ConnectivityChanged {
            uuid: "zl-1".into(),
            from: Connectivity::Connected,
            to: Connectivity::Disconnected,
        }));
    }

    #[test]
    fn test_repeated_disconnect_with_bound_handle_still_cancels() {
        let d = dispatcher();
        let mut rx = d.events.subscribe();
        d.dispatch(found("zl-1")).unwrap();
        d.dispatch(TransportEvent::Meditation {
            uuid: "zl-1".into(),
            value: 40.0,
        })
        .unwrap();

        // Recorded state is already `Disconnected`, yet a handle is bound and
        // a command is outstanding on it.
        d.registry.bind_handle("zl-1", Handle(5)).unwrap();
        let outcome = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&outcome);
        d.correlator
            .submit("zl-1", CommandKind::SleepMode, 12, move |o| {
                *sink.lock().unwrap() = Some(o);
            })
            .unwrap();

        d.dispatch(TransportEvent::ConnectivityChanged {
            uuid: "zl-1".into(),
            state: Connectivity::Disconnected,
        })
        .unwrap();

        assert_eq!(d.registry.handle_for("zl-1"), None);
        assert_eq!(*outcome.lock().unwrap(), Some(CommandOutcome::Cancelled));
        assert!(d.telemetry.snapshot("zl-1", Channel::Meditation).unwrap().stale);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&SessionEvent::CommandsCancelled {
            uuid: "zl-1".into(),
            count: 1,
        }));
        // No state change, so no connectivity broadcast.
        assert!(
            !seen
                .iter()
                .any(|e| matches!(e, SessionEvent::ConnectivityChanged { .. }))
        );
    }

    #[test]
    fn test_response_resolves_correlator() {
        let d = dispatcher();
        d.dispatch(found("zl-1")).unwrap();

        let outcome = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&outcome);
        d.correlator
            .submit("zl-1", CommandKind::AfeConfig, 3, move |o| {
                *sink.lock().unwrap() = Some(o);
            })
            .unwrap();

        d.dispatch(TransportEvent::CommandResponse {
            uuid: "zl-1".into(),
            id: 3,
            response: ok_response(),
        })
        .unwrap();
        assert!(outcome.lock().unwrap().as_ref().unwrap().is_success());

        // A second response for the same id is stale.
        d.dispatch(TransportEvent::CommandResponse {
            uuid: "zl-1".into(),
            id: 3,
            response: ok_response(),
        })
        .unwrap();
        let metrics = d.metrics.snapshot();
        assert_eq!(metrics.responses, 2);
        assert_eq!(metrics.stale_resolutions, 1);
    }

    #[tokio::test]
    async fn test_run_drains_until_channel_closes() {
        let d = dispatcher();
        let registry = Arc::clone(&d.registry);
        let (tx, rx) = transport_channel();
        let handle = d.spawn(rx, CancellationToken::new());

        tx.send(found("zl-1")).unwrap();
        tx.send(found("zl-2")).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(registry.device_ids(), vec!["zl-1", "zl-2"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let d = dispatcher();
        let (_tx, rx) = transport_channel();
        let cancel = CancellationToken::new();
        let handle = d.spawn(rx, cancel.clone());

        cancel.cancel();
        handle.await.unwrap();
    }
}
