//! Telemetry and status records delivered by the transport.
//!
//! Multi-part records mirror the native layout: every sub-record that the
//! device may omit is an `Option`, so a batch that carries only gyroscope
//! data, or only algorithmic PPG metrics, is represented faithfully.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::codes::HardwareError;
use crate::error::{ParseError, ParseResult};
use crate::types::{
    BodyPose, HeadPose, PpgActivity, PpgContactState, RespiratoryState, Spo2State,
};

/// Advertisement data for a device found during a scan.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanResult {
    /// Stable device identifier.
    pub uuid: String,
    /// Advertised name.
    pub name: String,
    /// Signal strength in dBm.
    pub rssi: f32,
    /// Hardware address.
    pub address: u64,
    /// Whether the device advertises that it is waiting to be paired.
    pub in_pairing_mode: bool,
    /// Battery level from the advertisement (0-100).
    pub battery_level: u8,
}

impl ScanResult {
    /// Create a scan result with the given identity and default attributes.
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the signal strength.
    #[must_use]
    pub fn with_rssi(mut self, rssi: f32) -> Self {
        self.rssi = rssi;
        self
    }

    /// Set the hardware address.
    #[must_use]
    pub fn with_address(mut self, address: u64) -> Self {
        self.address = address;
        self
    }

    /// Set the pairing-mode flag.
    #[must_use]
    pub fn with_pairing_mode(mut self, in_pairing_mode: bool) -> Self {
        self.in_pairing_mode = in_pairing_mode;
        self
    }

    /// Set the advertised battery level, clamped to 0-100.
    #[must_use]
    pub fn with_battery_level(mut self, level: u8) -> Self {
        self.battery_level = level.min(100);
        self
    }
}

/// Device information, available once the device is connected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    /// Manufacturer name.
    pub manufacturer: String,
    /// Model number.
    pub model: String,
    /// Serial number.
    pub serial: String,
    /// Hardware revision.
    pub hardware: String,
    /// Firmware revision.
    pub firmware: String,
}

/// A batch of single-channel EEG samples.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EegData {
    /// Packet sequence number.
    pub sequence_num: i32,
    /// Sample rate of this batch in Hz.
    pub sample_rate: f32,
    /// Samples in microvolts, oldest first.
    pub samples: Vec<f32>,
}

/// A three-axis point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    /// Create a point.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// A batch of three-axis samples from the accelerometer or gyroscope.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MotionData {
    /// Packet sequence number.
    pub sequence_num: i32,
    /// Samples, oldest first.
    pub points: Vec<Point3>,
}

impl MotionData {
    /// Split the batch into per-axis columns `[x, y, z]`.
    pub fn columns(&self) -> [Vec<f32>; 3] {
        let mut x = Vec::with_capacity(self.points.len());
        let mut y = Vec::with_capacity(self.points.len());
        let mut z = Vec::with_capacity(self.points.len());
        for p in &self.points {
            x.push(p.x);
            y.push(p.y);
            z.push(p.z);
        }
        [x, y, z]
    }
}

/// A batch of euler angles in degrees.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EulerAngleData {
    pub yaw: Vec<f32>,
    pub pitch: Vec<f32>,
    pub roll: Vec<f32>,
}

impl EulerAngleData {
    /// Number of samples, or an error if the three axes differ in length.
    pub fn len(&self) -> ParseResult<usize> {
        let n = self.yaw.len();
        if self.pitch.len() != n || self.roll.len() != n {
            return Err(ParseError::InvalidData(format!(
                "euler axes misaligned: yaw={}, pitch={}, roll={}",
                n,
                self.pitch.len(),
                self.roll.len()
            )));
        }
        Ok(n)
    }

    /// Whether the batch carries no samples.
    pub fn is_empty(&self) -> bool {
        self.yaw.is_empty() && self.pitch.is_empty() && self.roll.is_empty()
    }
}

/// An IMU batch. Each sensor is present only if enabled by the IMU mode.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImuData {
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub acc: Option<MotionData>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub gyro: Option<MotionData>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub euler: Option<EulerAngleData>,
    /// Sample rate of this batch in Hz.
    pub sample_rate: f32,
    pub head: HeadPose,
    pub body: BodyPose,
}

/// One raw PPG sample (photodiode counts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PpgRawSample {
    pub green1: i32,
    pub green2: i32,
    pub ir: i32,
    pub red: i32,
}

/// One sample of the on-device PPG algorithm.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PpgAlgoSample {
    /// Heart rate in bpm.
    pub hr: f32,
    /// Heart rate confidence in percent.
    pub hr_conf: i32,
    /// RR interval in ms.
    pub rr: f32,
    /// RR interval confidence in percent.
    pub rr_conf: i32,
    pub activity: PpgActivity,
    /// Oxygen saturation in percent.
    pub spo2: f32,
    pub spo2_r: f32,
    pub spo2_conf: i32,
    pub spo2_progress: i32,
    pub spo2_state: Spo2State,
    /// Negative when not yet available.
    pub hrv: f32,
    /// Negative when not yet available.
    pub hrv_stress: f32,
    /// Negative when not yet available.
    pub stress: f32,
    pub contact_state: PpgContactState,
}

impl Default for PpgAlgoSample {
    fn default() -> Self {
        Self {
            hr: 0.0,
            hr_conf: 0,
            rr: 0.0,
            rr_conf: 0,
            activity: PpgActivity::Rest,
            spo2: 0.0,
            spo2_r: 0.0,
            spo2_conf: 0,
            spo2_progress: 0,
            spo2_state: Spo2State::AdjustingLed,
            hrv: -1.0,
            hrv_stress: -1.0,
            stress: -1.0,
            contact_state: PpgContactState::Unknown,
        }
    }
}

/// Respiratory sub-record attached to raw PPG batches.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RespiratoryRecord {
    /// Breaths per minute.
    pub rate: f32,
    /// Respiratory curve, oldest first.
    pub curve: Vec<f32>,
    pub state: RespiratoryState,
}

/// A PPG batch carrying raw counts, algorithm output, or both.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PpgData {
    /// Packet sequence number.
    pub sequence_num: i32,
    /// Report rate of this batch in Hz.
    pub sample_rate: f32,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub raw: Option<Vec<PpgRawSample>>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub algo: Option<Vec<PpgAlgoSample>>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub respiratory: Option<RespiratoryRecord>,
}

/// EEG band powers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BrainWave {
    pub delta: f64,
    pub theta: f64,
    pub alpha: f64,
    pub low_beta: f64,
    pub high_beta: f64,
    pub gamma: f64,
}

/// Summary of a completed sleep session (unix seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SleepReport {
    pub begin_time: i64,
    pub end_time: i64,
    pub fall_asleep_time: i64,
}

/// System information returned by a sys-info query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SysInfo {
    pub firmware_info: String,
    pub hardware_errors: Vec<HardwareError>,
    /// Idle time before the device sleeps; 0 disables sleeping.
    pub sleep_idle_time_sec: i32,
    /// Vibration intensity, 0-100.
    pub vibration_intensity: i32,
}
