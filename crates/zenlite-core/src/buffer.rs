//! Sliding-window telemetry buffers.
//!
//! Each [`Channel`] of a device is buffered independently in a
//! [`WindowBuffer`]: a FIFO of axis-aligned samples whose capacity is
//! `window_seconds x sample_rate`, recomputed on every append because the
//! producer may change the rate mid-session. A channel that has never
//! received data is absent, which is distinct from an empty buffer.
//!
//! [`DeviceTelemetry`] groups the channels of one device and knows how to
//! fan a telemetry record out into them; [`TelemetryStore`] maps devices to
//! their telemetry, with one lock per device so a slow consumer of one
//! device never stalls the producer of another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use zenlite_types::{EegData, ImuData, PpgData, SleepStage};

use crate::config::WindowConfig;
use crate::error::{Error, Result};

/// Sample rate used for channels fed one scalar per second.
pub const NOMINAL_SCALAR_RATE: f32 = 1.0;

/// A buffered telemetry channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// EEG in microvolts.
    Eeg,
    /// Accelerometer x, y, z.
    Accelerometer,
    /// Gyroscope x, y, z.
    Gyroscope,
    /// Yaw, pitch, roll.
    EulerAngle,
    /// Green1, green2, IR and red photodiode counts.
    PpgRaw,
    /// Heart rate and its confidence.
    HeartRate,
    /// RR interval and its confidence; only fully confident samples.
    RrInterval,
    /// SpO2 and its confidence.
    Spo2,
    Activity,
    /// Only available (non-negative) values.
    Hrv,
    /// Only available (non-negative) values.
    HrvStress,
    /// Stress computed by the PPG algorithm; only available values.
    PpgStress,
    /// Respiratory curve.
    Respiratory,
    /// Stress scalar reported by the device.
    Stress,
    /// Meditation scalar reported by the device.
    Meditation,
    /// Unix time, stage, confidence, drowsiness.
    SleepStage,
}

impl Channel {
    /// Every channel, in declaration order.
    pub const ALL: [Channel; 16] = [
        Channel::Eeg,
        Channel::Accelerometer,
        Channel::Gyroscope,
        Channel::EulerAngle,
        Channel::PpgRaw,
        Channel::HeartRate,
        Channel::RrInterval,
        Channel::Spo2,
        Channel::Activity,
        Channel::Hrv,
        Channel::HrvStress,
        Channel::PpgStress,
        Channel::Respiratory,
        Channel::Stress,
        Channel::Meditation,
        Channel::SleepStage,
    ];

    /// Names of the axes, in buffer order.
    pub fn axis_labels(self) -> &'static [&'static str] {
        match self {
            Channel::Eeg => &["eeg"],
            Channel::Accelerometer | Channel::Gyroscope => &["x", "y", "z"],
            Channel::EulerAngle => &["yaw", "pitch", "roll"],
            Channel::PpgRaw => &["green1", "green2", "ir", "red"],
            Channel::HeartRate => &["hr", "confidence"],
            Channel::RrInterval => &["rr", "confidence"],
            Channel::Spo2 => &["spo2", "confidence"],
            Channel::Activity => &["activity"],
            Channel::Hrv => &["hrv"],
            Channel::HrvStress => &["hrv_stress"],
            Channel::PpgStress => &["stress"],
            Channel::Respiratory => &["curve"],
            Channel::Stress => &["stress"],
            Channel::Meditation => &["meditation"],
            Channel::SleepStage => &["time", "stage", "confidence", "drowsiness"],
        }
    }

    /// Number of parallel axes.
    pub fn axis_count(self) -> usize {
        self.axis_labels().len()
    }

    /// Snake-case name, as used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Channel::Eeg => "eeg",
            Channel::Accelerometer => "accelerometer",
            Channel::Gyroscope => "gyroscope",
            Channel::EulerAngle => "euler_angle",
            Channel::PpgRaw => "ppg_raw",
            Channel::HeartRate => "heart_rate",
            Channel::RrInterval => "rr_interval",
            Channel::Spo2 => "spo2",
            Channel::Activity => "activity",
            Channel::Hrv => "hrv",
            Channel::HrvStress => "hrv_stress",
            Channel::PpgStress => "ppg_stress",
            Channel::Respiratory => "respiratory",
            Channel::Stress => "stress",
            Channel::Meditation => "meditation",
            Channel::SleepStage => "sleep_stage",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of samples a window of `window` holds at `sample_rate`.
///
/// Fractional samples are truncated; a non-positive or non-finite rate
/// yields zero.
pub fn window_capacity(window: Duration, sample_rate: f32) -> usize {
    let samples = window.as_secs_f64() * f64::from(sample_rate);
    if samples.is_finite() && samples > 0.0 {
        samples as usize
    } else {
        0
    }
}

/// Copy of a channel's buffer taken under its lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Latest sample rate reported by the producer.
    pub sample_rate: f32,
    /// One vector per axis, oldest sample first.
    pub axes: Vec<Vec<f64>>,
    /// Set once the owning device disconnected; cleared by the next append.
    pub stale: bool,
}

impl ChannelSnapshot {
    /// Number of samples per axis.
    pub fn len(&self) -> usize {
        self.axes.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One axis by index.
    pub fn axis(&self, index: usize) -> Option<&[f64]> {
        self.axes.get(index).map(Vec::as_slice)
    }
}

/// FIFO of axis-aligned samples trimmed to a time window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowBuffer {
    sample_rate: f32,
    axes: Vec<Vec<f64>>,
    stale: bool,
}

impl WindowBuffer {
    /// Create a buffer from its first batch, trimmed to the window.
    pub fn from_batch(sample_rate: f32, batch: Vec<Vec<f64>>, window: Duration) -> Result<Self> {
        check_aligned(&batch)?;
        let mut buffer = Self {
            sample_rate,
            axes: batch,
            stale: false,
        };
        buffer.trim(window);
        Ok(buffer)
    }

    /// Append a batch and trim to the window.
    ///
    /// The batch must carry one vector per axis, all of equal length.
    /// Returns the number of samples retained.
    pub fn append(
        &mut self,
        sample_rate: f32,
        batch: Vec<Vec<f64>>,
        window: Duration,
    ) -> Result<usize> {
        check_aligned(&batch)?;
        if batch.len() != self.axes.len() {
            return Err(Error::InvalidData(format!(
                "batch has {} axes, buffer has {}",
                batch.len(),
                self.axes.len()
            )));
        }
        for (axis, incoming) in self.axes.iter_mut().zip(batch) {
            axis.extend(incoming);
        }
        self.sample_rate = sample_rate;
        self.stale = false;
        self.trim(window);
        Ok(self.len())
    }

    /// Drop the oldest samples until at most `capacity` remain.
    ///
    /// Trimming an already-trimmed buffer is a no-op.
    pub fn trim(&mut self, window: Duration) {
        let capacity = window_capacity(window, self.sample_rate);
        let len = self.len();
        if len > capacity {
            let excess = len - capacity;
            for axis in &mut self.axes {
                axis.drain(..excess);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.axes.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Flag the buffer as belonging to a disconnected device.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Copy the buffer contents.
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            sample_rate: self.sample_rate,
            axes: self.axes.clone(),
            stale: self.stale,
        }
    }
}

fn check_aligned(batch: &[Vec<f64>]) -> Result<()> {
    let Some(first) = batch.first() else {
        return Err(Error::InvalidData("batch has no axes".into()));
    };
    if batch.iter().any(|axis| axis.len() != first.len()) {
        return Err(Error::InvalidData("batch axes have different lengths".into()));
    }
    Ok(())
}

/// The telemetry channels of one device.
#[derive(Debug, Clone, Default)]
pub struct DeviceTelemetry {
    windows: WindowConfig,
    channels: HashMap<Channel, WindowBuffer>,
}

impl DeviceTelemetry {
    /// Create empty telemetry using `windows` for channel durations.
    pub fn new(windows: WindowConfig) -> Self {
        Self {
            windows,
            channels: HashMap::new(),
        }
    }

    /// Append an axis-aligned batch to one channel, creating it if absent.
    pub fn append(&mut self, channel: Channel, sample_rate: f32, batch: Vec<Vec<f64>>) -> Result<usize> {
        if batch.len() != channel.axis_count() {
            return Err(Error::InvalidData(format!(
                "{} expects {} axes, got {}",
                channel,
                channel.axis_count(),
                batch.len()
            )));
        }
        let window = self.windows.window_for(channel);
        match self.channels.get_mut(&channel) {
            Some(buffer) => buffer.append(sample_rate, batch, window),
            None => {
                let buffer = WindowBuffer::from_batch(sample_rate, batch, window)?;
                let len = buffer.len();
                self.channels.insert(channel, buffer);
                Ok(len)
            }
        }
    }

    /// Copy of one channel, `None` while it has never received data.
    pub fn snapshot(&self, channel: Channel) -> Option<ChannelSnapshot> {
        self.channels.get(&channel).map(WindowBuffer::snapshot)
    }

    /// Channels that have received data, in declaration order.
    pub fn present_channels(&self) -> Vec<Channel> {
        let mut present: Vec<Channel> = self.channels.keys().copied().collect();
        present.sort();
        present
    }

    /// Flag every channel as stale.
    pub fn mark_stale(&mut self) {
        for buffer in self.channels.values_mut() {
            buffer.mark_stale();
        }
    }

    /// Drop every channel, returning them to absent.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Buffer an EEG batch.
    pub fn ingest_eeg(&mut self, data: &EegData) -> Result<()> {
        if data.samples.is_empty() {
            return Ok(());
        }
        let samples = data.samples.iter().map(|&v| f64::from(v)).collect();
        self.append(Channel::Eeg, data.sample_rate, vec![samples])?;
        Ok(())
    }

    /// Buffer whichever IMU sensors the batch carries.
    pub fn ingest_imu(&mut self, data: &ImuData) -> Result<()> {
        if let Some(acc) = &data.acc {
            self.append(Channel::Accelerometer, data.sample_rate, widen(acc.columns()))?;
        }
        if let Some(gyro) = &data.gyro {
            self.append(Channel::Gyroscope, data.sample_rate, widen(gyro.columns()))?;
        }
        if let Some(euler) = &data.euler {
            euler.len()?;
            let axes = [&euler.yaw, &euler.pitch, &euler.roll]
                .into_iter()
                .map(|axis| axis.iter().map(|&v| f64::from(v)).collect())
                .collect();
            self.append(Channel::EulerAngle, data.sample_rate, axes)?;
        }
        Ok(())
    }

    /// Buffer the raw, algorithmic and respiratory parts of a PPG batch.
    pub fn ingest_ppg(&mut self, data: &PpgData) -> Result<()> {
        let rate = data.sample_rate;

        if let Some(respiratory) = &data.respiratory
            && !respiratory.curve.is_empty()
        {
            let curve = respiratory.curve.iter().map(|&v| f64::from(v)).collect();
            self.append(Channel::Respiratory, rate, vec![curve])?;
        }

        if let Some(raw) = data.raw.as_ref().filter(|raw| !raw.is_empty()) {
            let mut axes = vec![Vec::with_capacity(raw.len()); 4];
            for sample in raw {
                axes[0].push(f64::from(sample.green1));
                axes[1].push(f64::from(sample.green2));
                axes[2].push(f64::from(sample.ir));
                axes[3].push(f64::from(sample.red));
            }
            self.append(Channel::PpgRaw, rate, axes)?;
        }

        if let Some(algo) = &data.algo {
            for sample in algo {
                self.append(
                    Channel::HeartRate,
                    rate,
                    vec![vec![f64::from(sample.hr)], vec![f64::from(sample.hr_conf)]],
                )?;
                if sample.rr_conf == 100 {
                    self.append(
                        Channel::RrInterval,
                        rate,
                        vec![vec![f64::from(sample.rr)], vec![f64::from(sample.rr_conf)]],
                    )?;
                }
                self.append(
                    Channel::Spo2,
                    rate,
                    vec![vec![f64::from(sample.spo2)], vec![f64::from(sample.spo2_conf)]],
                )?;
                self.append(
                    Channel::Activity,
                    rate,
                    vec![vec![f64::from(sample.activity.as_raw())]],
                )?;
                if sample.hrv >= 0.0 {
                    self.append(Channel::Hrv, rate, vec![vec![f64::from(sample.hrv)]])?;
                }
                if sample.hrv_stress >= 0.0 {
                    self.append(
                        Channel::HrvStress,
                        rate,
                        vec![vec![f64::from(sample.hrv_stress)]],
                    )?;
                }
                if sample.stress >= 0.0 {
                    self.append(Channel::PpgStress, rate, vec![vec![f64::from(sample.stress)]])?;
                }
            }
        }
        Ok(())
    }

    /// Buffer one device-reported stress value.
    pub fn ingest_stress(&mut self, value: f32) -> Result<()> {
        self.append(Channel::Stress, NOMINAL_SCALAR_RATE, vec![vec![f64::from(value)]])?;
        Ok(())
    }

    /// Buffer one meditation value.
    pub fn ingest_meditation(&mut self, value: f32) -> Result<()> {
        self.append(
            Channel::Meditation,
            NOMINAL_SCALAR_RATE,
            vec![vec![f64::from(value)]],
        )?;
        Ok(())
    }

    /// Record a sleep-stage classification received at `unix_time` seconds.
    pub fn ingest_sleep_stage(
        &mut self,
        unix_time: f64,
        stage: SleepStage,
        confidence: f32,
        drowsiness: f32,
    ) -> Result<()> {
        self.append(
            Channel::SleepStage,
            NOMINAL_SCALAR_RATE,
            vec![
                vec![unix_time],
                vec![f64::from(stage.as_raw())],
                vec![f64::from(confidence)],
                vec![f64::from(drowsiness)],
            ],
        )?;
        Ok(())
    }
}

fn widen(columns: [Vec<f32>; 3]) -> Vec<Vec<f64>> {
    columns
        .into_iter()
        .map(|axis| axis.into_iter().map(f64::from).collect())
        .collect()
}

/// Telemetry of every device, one lock per device.
#[derive(Debug, Default)]
pub struct TelemetryStore {
    windows: WindowConfig,
    devices: RwLock<HashMap<String, Arc<Mutex<DeviceTelemetry>>>>,
}

impl TelemetryStore {
    /// Create an empty store.
    pub fn new(windows: WindowConfig) -> Self {
        Self {
            windows,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Run `f` on a device's telemetry, creating it on first use.
    pub fn with_device<R>(&self, uuid: &str, f: impl FnOnce(&mut DeviceTelemetry) -> R) -> R {
        let entry = self.entry(uuid);
        let mut telemetry = lock(&entry);
        f(&mut telemetry)
    }

    /// Copy of one channel of one device.
    pub fn snapshot(&self, uuid: &str, channel: Channel) -> Option<ChannelSnapshot> {
        let entry = self.existing(uuid)?;
        let telemetry = lock(&entry);
        telemetry.snapshot(channel)
    }

    /// Channels of a device that have received data.
    pub fn present_channels(&self, uuid: &str) -> Vec<Channel> {
        self.existing(uuid)
            .map(|entry| lock(&entry).present_channels())
            .unwrap_or_default()
    }

    /// Flag every channel of a device as stale.
    pub fn mark_stale(&self, uuid: &str) {
        if let Some(entry) = self.existing(uuid) {
            lock(&entry).mark_stale();
        }
    }

    /// Return every channel of a device to absent.
    pub fn clear(&self, uuid: &str) {
        if let Some(entry) = self.existing(uuid) {
            lock(&entry).clear();
        }
    }

    /// Log and swallow an ingest failure; malformed batches are dropped.
    pub(crate) fn ingest(&self, uuid: &str, what: &str, f: impl FnOnce(&mut DeviceTelemetry) -> Result<()>) {
        if let Err(e) = self.with_device(uuid, f) {
            warn!("Dropping malformed {} batch from {}: {}", what, uuid, e);
        }
    }

    fn existing(&self, uuid: &str) -> Option<Arc<Mutex<DeviceTelemetry>>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uuid)
            .cloned()
    }

    fn entry(&self, uuid: &str) -> Arc<Mutex<DeviceTelemetry>> {
        if let Some(entry) = self.existing(uuid) {
            return entry;
        }
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            devices
                .entry(uuid.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(DeviceTelemetry::new(self.windows.clone())))),
        )
    }
}

fn lock(entry: &Mutex<DeviceTelemetry>) -> MutexGuard<'_, DeviceTelemetry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}
