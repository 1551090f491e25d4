//! Example: Streaming From a Simulated Headband
//!
//! This example runs a complete session against the mock transport:
//! discovery, connection, pairing, sensor configuration, and a few
//! seconds of synthetic EEG and heart-rate data sampled from the
//! sliding-window buffers.
//!
//! Run with: `RUST_LOG=debug cargo run --example mock_session`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use zenlite_core::{
    Channel, Listener, MockTransport, Session, SessionConfig, SessionEvent, TransportEvent,
    outcome_channel,
};
use zenlite_types::{
    DeviceInfo, EegSampleRate, ImuMode, ImuSampleRate, PpgAlgoSample, PpgData, PpgMode,
    PpgRawRegister, PpgReportRate,
};

struct Printer;

impl Listener for Printer {
    fn on_connectivity_change(&self, uuid: &str, state: zenlite_core::Connectivity) {
        println!("  [{}] connectivity: {}", uuid, state);
    }

    fn on_device_info_ready(&self, uuid: &str, info: &DeviceInfo) {
        println!("  [{}] {} {} (fw {})", uuid, info.manufacturer, info.model, info.firmware);
    }

    fn on_blink(&self, uuid: &str) {
        println!("  [{}] blink", uuid);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (transport, events) = MockTransport::new();
    let advertised = transport.add_random_device();
    let uuid = advertised.uuid.clone();

    let session = Arc::new(Session::new(transport, SessionConfig::default())?);
    let mut updates = session.subscribe();
    let cancel = CancellationToken::new();
    let dispatcher = session.spawn_dispatcher(events, cancel.clone());

    println!("Scanning...");
    session.start_scan()?;
    match updates.recv().await? {
        SessionEvent::Discovered { uuid, name, rssi, .. } => {
            println!("  Found {} ({}) at {} dBm", name, uuid, rssi);
        }
        other => bail!("unexpected event while scanning: {:?}", other),
    }

    session.set_listener(&uuid, Arc::new(Printer));
    session.connect(&uuid)?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!();
    println!("Configuring...");
    let (done, outcome) = outcome_channel();
    session.pair(&uuid, None, done)?;
    println!("  pair: {:?}", outcome.await.context("pair dropped")?);

    let (done, outcome) = outcome_channel();
    session.configure_afe(&uuid, EegSampleRate::Hz256, done)?;
    println!("  AFE: {:?}", outcome.await.context("AFE config dropped")?);

    let (done, outcome) = outcome_channel();
    session.configure_imu(&uuid, ImuSampleRate::Hz50, ImuMode::AccGyro, done)?;
    println!("  IMU: {:?}", outcome.await.context("IMU config dropped")?);

    let (done, outcome) = outcome_channel();
    session.configure_ppg(
        &uuid,
        PpgReportRate::Hz1,
        PpgMode::Algo,
        PpgRawRegister::Register,
        0,
        done,
    )?;
    println!("  PPG: {:?}", outcome.await.context("PPG config dropped")?);

    let (done, _) = outcome_channel();
    session.get_system_info(&uuid, done, |info| {
        println!("  System: {} (sleep idle {}s)", info.firmware_info, info.sleep_idle_time_sec);
    })?;

    // Synthetic data: a 10 Hz sine at 256 Hz in 64-sample packets, plus a
    // heart-rate sample every second.
    let producer = {
        let session = Arc::clone(&session);
        let uuid = uuid.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(250));
            let mut sequence = 0;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let samples = (0..64)
                            .map(|i| {
                                let t = (sequence * 64 + i) as f32 / 256.0;
                                (t * 10.0 * std::f32::consts::TAU).sin() * 50.0
                            })
                            .collect();
                        session.transport().emit_eeg(&uuid, sequence, 256.0, samples);
                        if sequence % 4 == 0 {
                            session.transport().emit(TransportEvent::Ppg {
                                uuid: uuid.clone(),
                                data: PpgData {
                                    sequence_num: sequence / 4,
                                    sample_rate: 1.0,
                                    algo: Some(vec![PpgAlgoSample {
                                        hr: 60.0 + (sequence % 7) as f32,
                                        hr_conf: 90,
                                        ..Default::default()
                                    }]),
                                    ..Default::default()
                                },
                            });
                        }
                        sequence += 1;
                    }
                }
            }
        })
    };

    println!();
    println!("Streaming...");
    let mut sampler = tokio::time::interval(Duration::from_secs(1));
    sampler.tick().await;
    for _ in 0..3 {
        sampler.tick().await;
        let eeg = session.snapshot(&uuid, Channel::Eeg);
        let hr = session.snapshot(&uuid, Channel::HeartRate);
        println!(
            "  EEG: {:>5} samples | HR: {}",
            eeg.map(|s| s.len()).unwrap_or(0),
            hr.and_then(|s| s.axes[0].last().copied())
                .map(|v| format!("{:.0} bpm", v))
                .unwrap_or_else(|| "-".to_string())
        );
    }

    println!();
    println!("Disconnecting...");
    session.disconnect(&uuid)?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let battery = session.battery_level(&uuid)?;
    println!("  Battery: {}% ({:?})", battery.value, battery.source);
    println!("  Metrics: {:?}", session.metrics());

    cancel.cancel();
    producer.await?;
    dispatcher.await?;
    Ok(())
}
