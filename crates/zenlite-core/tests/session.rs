//! Integration tests for zenlite-core
//!
//! These tests drive a full session over the mock transport with the
//! dispatcher running on its own task, the way an application does.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use zenlite_core::{
    Channel, CommandOutcome, Connectivity, Handle, Listener, MockCommand, MockTransport,
    MockTransportBuilder, ScanResult, Session, SessionConfig, SessionEvent, TransportEvent,
    WindowConfig, outcome_channel,
};
use zenlite_types::{
    EegSampleRate, ImuData, ImuMode, ImuSampleRate, MotionData, Point3, PpgAlgoSample, PpgData,
    PpgMode, PpgRawRegister, PpgReportRate, SleepStage,
};

/// Upper bound for anything that waits on the dispatcher.
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    session: Arc<Session<MockTransport>>,
    cancel: CancellationToken,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(builder: MockTransportBuilder, config: SessionConfig) -> Self {
        let (transport, events) = builder.build();
        let session = Arc::new(Session::new(transport, config).unwrap());
        let cancel = CancellationToken::new();
        let dispatcher = session.spawn_dispatcher(events, cancel.clone());
        Self {
            session,
            cancel,
            dispatcher,
        }
    }

    fn transport(&self) -> &MockTransport {
        self.session.transport()
    }

    /// Poll until `check` holds.
    async fn until(&self, mut check: impl FnMut(&Session<MockTransport>) -> bool) {
        timeout(WAIT, async {
            while !check(&self.session) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn discover_and_connect(&self, uuid: &str) {
        self.session.start_scan().unwrap();
        self.until(|s| s.device(uuid).is_ok()).await;
        self.session.connect(uuid).unwrap();
        self.until(|s| {
            s.device(uuid)
                .map(|d| d.connectivity() == Connectivity::Connected)
                .unwrap_or(false)
        })
        .await;
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        self.dispatcher.await.unwrap();
    }
}

fn headband(uuid: &str) -> ScanResult {
    ScanResult::new(uuid, "ZenLite")
        .with_rssi(-55.0)
        .with_battery_level(77)
}

#[derive(Default)]
struct Collector {
    connectivity: Mutex<Vec<Connectivity>>,
    eeg_batches: Mutex<usize>,
    blinks: Mutex<usize>,
    sleep: Mutex<Vec<SleepStage>>,
}

impl Listener for Collector {
    fn on_connectivity_change(&self, _uuid: &str, state: Connectivity) {
        self.connectivity.lock().unwrap().push(state);
    }

    fn on_eeg_data(&self, _uuid: &str, _data: &zenlite_types::EegData) {
        *self.eeg_batches.lock().unwrap() += 1;
    }

    fn on_blink(&self, _uuid: &str) {
        *self.blinks.lock().unwrap() += 1;
    }

    fn on_sleep_stage(&self, _uuid: &str, stage: SleepStage, _confidence: f32, _drowsiness: f32) {
        self.sleep.lock().unwrap().push(stage);
    }
}

#[tokio::test]
async fn test_discovery_is_broadcast_and_deduplicated() {
    let harness = Harness::start(
        MockTransportBuilder::new()
            .device(headband("zl-1"))
            .device(headband("zl-2")),
        SessionConfig::default(),
    );
    let mut events = harness.session.subscribe();

    harness.session.start_scan().unwrap();
    harness.session.start_scan().unwrap();
    harness.until(|s| s.metrics().events_dispatched >= 4).await;

    assert_eq!(harness.session.devices().len(), 2);
    let mut new_flags = Vec::new();
    while let Ok(SessionEvent::Discovered { new, .. }) = events.try_recv() {
        new_flags.push(new);
    }
    assert_eq!(new_flags, vec![true, true, false, false]);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_full_session_flow() {
    let harness = Harness::start(
        MockTransportBuilder::new().device(headband("zl-1")),
        SessionConfig::default(),
    );
    let collector = Arc::new(Collector::default());
    harness.session.set_listener("zl-1", collector.clone());

    harness.discover_and_connect("zl-1").await;
    assert_eq!(
        *collector.connectivity.lock().unwrap(),
        vec![Connectivity::Connecting, Connectivity::Connected]
    );

    // Pair, then configure every sensor, each awaiting its outcome.
    let (done, outcome) = outcome_channel();
    harness.session.pair("zl-1", None, done).unwrap();
    assert!(outcome.await.unwrap().is_success());

    let (done, outcome) = outcome_channel();
    harness
        .session
        .configure_afe("zl-1", EegSampleRate::Hz256, done)
        .unwrap();
    assert!(outcome.await.unwrap().is_success());

    let (done, outcome) = outcome_channel();
    harness
        .session
        .configure_imu("zl-1", ImuSampleRate::Hz50, ImuMode::AccGyro, done)
        .unwrap();
    assert!(outcome.await.unwrap().is_success());

    let (done, outcome) = outcome_channel();
    harness
        .session
        .configure_ppg(
            "zl-1",
            PpgReportRate::Hz25,
            PpgMode::Algo,
            PpgRawRegister::Register,
            0,
            done,
        )
        .unwrap();
    assert!(outcome.await.unwrap().is_success());

    // Stream data.
    harness
        .transport()
        .emit_eeg("zl-1", 1, 256.0, vec![10.0; 256]);
    harness.transport().emit(TransportEvent::Imu {
        uuid: "zl-1".into(),
        data: ImuData {
            acc: Some(MotionData {
                sequence_num: 1,
                points: vec![Point3::new(0.0, 0.0, 1.0); 10],
            }),
            sample_rate: 50.0,
            ..Default::default()
        },
    });
    harness.transport().emit(TransportEvent::Ppg {
        uuid: "zl-1".into(),
        data: PpgData {
            sequence_num: 1,
            sample_rate: 25.0,
            algo: Some(vec![PpgAlgoSample {
                hr: 64.0,
                hr_conf: 95,
                ..Default::default()
            }]),
            ..Default::default()
        },
    });
    harness.transport().emit(TransportEvent::Blink {
        uuid: "zl-1".into(),
    });
    harness
        .until(|_| *collector.blinks.lock().unwrap() == 1)
        .await;

    let eeg = harness.session.snapshot("zl-1", Channel::Eeg).unwrap();
    assert_eq!(eeg.len(), 256);
    assert_eq!(eeg.sample_rate, 256.0);
    assert_eq!(
        harness
            .session
            .snapshot("zl-1", Channel::Accelerometer)
            .unwrap()
            .axes[2],
        vec![1.0; 10]
    );
    assert!(harness.session.snapshot("zl-1", Channel::Gyroscope).is_none());
    assert_eq!(*collector.eeg_batches.lock().unwrap(), 1);
    assert_eq!(*collector.blinks.lock().unwrap(), 1);

    let metrics = harness.session.metrics();
    assert_eq!(metrics.responses, 4);
    assert_eq!(metrics.streaming_events, 3);
    assert_eq!(metrics.anomalies, 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_eeg_window_under_sustained_streaming() {
    let harness = Harness::start(
        MockTransportBuilder::new().device(headband("zl-1")),
        SessionConfig::default(),
    );
    harness.discover_and_connect("zl-1").await;

    // 2000 samples at 256 Hz into a 5 s window keep the last 1280.
    for chunk in 0..20 {
        let samples: Vec<f32> = (chunk * 100..(chunk + 1) * 100).map(|v| v as f32).collect();
        harness.transport().emit_eeg("zl-1", chunk, 256.0, samples);
    }
    harness
        .until(|s| s.metrics().streaming_events == 20)
        .await;

    let eeg = harness.session.snapshot("zl-1", Channel::Eeg).unwrap();
    assert_eq!(eeg.len(), 1280);
    assert_eq!(eeg.axes[0].first(), Some(&720.0));
    assert_eq!(eeg.axes[0].last(), Some(&1999.0));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_cancels_and_marks_stale() {
    let harness = Harness::start(
        MockTransportBuilder::new().device(headband("zl-1")),
        SessionConfig::default(),
    );
    let mut events = harness.session.subscribe();
    harness.discover_and_connect("zl-1").await;
    harness.transport().emit(TransportEvent::Meditation {
        uuid: "zl-1".into(),
        value: 55.0,
    });
    harness
        .until(|s| s.snapshot("zl-1", Channel::Meditation).is_some())
        .await;

    // Leave the next command unanswered.
    harness.transport().set_auto_respond(false);
    let (done, outcome) = outcome_channel();
    harness
        .session
        .set_sleep_idle_time("zl-1", 600, done)
        .unwrap();

    harness.transport().set_auto_respond(true);
    harness.session.disconnect("zl-1").unwrap();

    assert_eq!(outcome.await.unwrap(), CommandOutcome::Cancelled);
    harness
        .until(|s| {
            s.device("zl-1")
                .map(|d| d.connectivity() == Connectivity::Disconnected)
                .unwrap_or(false)
        })
        .await;

    let meditation = harness.session.snapshot("zl-1", Channel::Meditation).unwrap();
    assert!(meditation.stale);
    assert_eq!(meditation.axes[0], vec![55.0]);

    assert!(
        harness
            .transport()
            .commands()
            .contains(&MockCommand::Disconnect { handle: Handle(1) })
    );
    assert_eq!(battery.value, 77);

    let mut cancelled = None;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::CommandsCancelled { count, .. } = event {
            cancelled = Some(count);
        }
    }
    assert_eq!(cancelled, Some(1));

    // A late response for the cancelled command is stale.
    harness.transport().respond(
        "zl-1",
        1,
        zenlite_types::CommandResponse::Afe {
            error: zenlite_types::AfeConfigError::None,
        },
    );
    harness
        .until(|s| s.metrics().stale_resolutions == 1)
        .await;

    // The device can reconnect and stream again.
    harness.session.connect("zl-1").unwrap();
    harness.transport().emit(TransportEvent::Meditation {
        uuid: "zl-1".into(),
        value: 60.0,
    });
    harness
        .until(|s| {
            s.snapshot("zl-1", Channel::Meditation)
                .map(|m| !m.stale)
                .unwrap_or(false)
        })
        .await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unknown_device_events_are_anomalies() {
    let harness = Harness::start(MockTransportBuilder::new(), SessionConfig::default());
    let mut events = harness.session.subscribe();

    harness
        .transport()
        .emit_eeg("never-seen", 1, 256.0, vec![1.0, 2.0]);
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        SessionEvent::DispatchAnomaly {
            uuid: "never-seen".into(),
            message: "eeg event for unknown device never-seen".into(),
        }
    );
    assert_eq!(harness.session.metrics().anomalies, 1);
    assert!(harness.session.snapshot("never-seen", Channel::Eeg).is_none());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_sleep_stage_history_window() {
    let windows = WindowConfig::default().with_override(Channel::SleepStage, 3.0);
    let harness = Harness::start(
        MockTransportBuilder::new().device(headband("zl-1")),
        SessionConfig::default().windows(windows),
    );
    let collector = Arc::new(Collector::default());
    harness.session.set_listener("zl-1", collector.clone());
    harness.discover_and_connect("zl-1").await;

    for stage in [
        SleepStage::Awake,
        SleepStage::Light,
        SleepStage::Deep,
        SleepStage::Rem,
        SleepStage::Light,
    ] {
        harness.transport().emit(TransportEvent::SleepStage {
            uuid: "zl-1".into(),
            stage,
            confidence: 0.7,
            drowsiness: 0.3,
        });
    }
    harness
        .until(|_| collector.sleep.lock().unwrap().len() == 5)
        .await;

    let history = harness.session.snapshot("zl-1", Channel::SleepStage).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.axes[1], vec![3.0, 1.0, 2.0]);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_commands_from_many_tasks() {
    let harness = Harness::start(
        MockTransportBuilder::new().device(headband("zl-1")),
        SessionConfig::default(),
    );
    harness.discover_and_connect("zl-1").await;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let session = Arc::clone(&harness.session);
        tasks.push(tokio::spawn(async move {
            let (done, outcome) = outcome_channel();
            session
                .send_system_command("zl-1", zenlite_types::SystemCommand::StartDataStream, done)
                .unwrap();
            outcome.await.unwrap()
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_success());
    }
    assert!(harness.session.pending_commands("zl-1").is_empty());
    assert_eq!(harness.session.metrics().responses, 16);

    harness.shutdown().await;
}

/// Reports each `Disconnected` it observes on a channel.
struct DisconnectWatch {
    states: Mutex<Vec<Connectivity>>,
    disconnected: Mutex<std::sync::mpsc::Sender<()>>,
}

impl Listener for DisconnectWatch {
    fn on_connectivity_change(&self, _uuid: &str, state: Connectivity) {
        self.states.lock().unwrap().push(state);
        if state == Connectivity::Disconnected {
            let _ = self.disconnected.lock().unwrap().send(());
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_link_lost_while_connect_call_is_running() {
    let harness = Harness::start(
        MockTransportBuilder::new().device(headband("zl-1")),
        SessionConfig::default(),
    );
    let (tx, applied) = std::sync::mpsc::channel();
    let watch = Arc::new(DisconnectWatch {
        states: Mutex::new(Vec::new()),
        disconnected: Mutex::new(tx),
    });
    harness.session.set_listener("zl-1", watch.clone());
    harness.session.start_scan().unwrap();
    harness.until(|s| s.device("zl-1").is_ok()).await;

    // Inside the transport call, the link drops and the dispatcher task
    // applies it before `connect` returns.
    harness.transport().on_next_connect(move |t, scan| {
        t.emit_connectivity(&scan.uuid, Connectivity::Disconnected);
        applied.recv_timeout(WAIT).unwrap();
    });
    assert!(matches!(
        harness.session.connect("zl-1"),
        Err(zenlite_core::Error::ConnectionFailed(_))
    ));
    assert!(harness.session.device("zl-1").unwrap().handle.is_none());

    // The refused handle is torn down on the transport as well.
    harness
        .until(|_| {
            watch
                .states
                .lock()
                .unwrap()
                .iter()
                .filter(|s| **s == Connectivity::Disconnected)
                .count()
                == 2
        })
        .await;
    assert!(
        harness
            .transport()
            .commands()
            .contains(&MockCommand::Disconnect { handle: Handle(1) })
    );

    // The next attempt succeeds and commands flow again.
    harness.session.connect("zl-1").unwrap();
    harness
        .until(|s| {
            s.device("zl-1")
                .map(|d| d.connectivity() == Connectivity::Connected)
                .unwrap_or(false)
        })
        .await;
    let (done, outcome) = outcome_channel();
    harness
        .session
        .configure_afe("zl-1", EegSampleRate::Hz128, done)
        .unwrap();
    assert!(timeout(WAIT, outcome).await.unwrap().unwrap().is_success());

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_sys_info_record_is_given_up() {
    let config = SessionConfig::default()
        .command_timeout(Duration::from_secs(2))
        .sweep_interval(Duration::from_millis(500));
    let harness = Harness::start(MockTransportBuilder::new().device(headband("zl-1")), config);
    harness.discover_and_connect("zl-1").await;
    let sweeper = harness
        .session
        .spawn_command_sweeper(harness.cancel.clone())
        .unwrap();

    // The device answers the query but never sends the record.
    harness.transport().set_auto_respond(false);
    let delivered = Arc::new(Mutex::new(false));
    let sink = Arc::clone(&delivered);
    let (done, outcome) = outcome_channel();
    let id = harness
        .session
        .get_system_info("zl-1", done, move |_| *sink.lock().unwrap() = true)
        .unwrap();
    harness.transport().respond(
        "zl-1",
        id,
        zenlite_types::CommandResponse::System {
            command: zenlite_types::SystemCommand::GetSystemInfo,
            error: zenlite_types::SysConfigError::None,
        },
    );
    assert!(outcome.await.unwrap().is_success());
    assert!(harness.session.awaiting_sys_info(id));

    harness.until(|s| !s.awaiting_sys_info(id)).await;
    assert!(harness.session.pending_commands("zl-1").is_empty());

    // A record arriving after that is dropped as stale.
    harness.transport().emit(TransportEvent::SysInfo {
        uuid: "zl-1".into(),
        id,
        info: zenlite_types::SysInfo::default(),
    });
    harness.until(|s| s.metrics().stale_resolutions == 1).await;
    assert!(!*delivered.lock().unwrap());
    assert_eq!(harness.session.metrics().timed_out_commands, 0);

    harness.shutdown().await;
    sweeper.await.unwrap();
}
