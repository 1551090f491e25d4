//! Session configuration.
//!
//! Loaded from TOML or built in code. Every field has a default so an empty
//! file is a valid configuration:
//!
//! ```toml
//! event_capacity = 100
//! command_timeout_secs = 10.0
//!
//! [windows]
//! eeg = 5.0
//! ppg_algo = 600.0
//!
//! [windows.overrides]
//! heart_rate = 120.0
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::Channel;
use crate::error::{Error, Result};

/// Buffer window lengths in seconds, grouped by signal family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// EEG.
    #[serde(default = "default_short_window")]
    pub eeg: f64,

    /// Accelerometer, gyroscope and Euler angles.
    #[serde(default = "default_short_window")]
    pub imu: f64,

    /// Raw PPG counts and the respiratory curve.
    #[serde(default = "default_ppg_window")]
    pub ppg_raw: f64,

    /// Heart rate, RR, SpO2, activity, HRV and the PPG stress metrics.
    #[serde(default = "default_long_window")]
    pub ppg_algo: f64,

    /// Device-reported stress and meditation.
    #[serde(default = "default_long_window")]
    pub mental: f64,

    /// Sleep-stage records.
    #[serde(default = "default_sleep_window")]
    pub sleep_stage: f64,

    /// Per-channel values that take precedence over the groups above.
    #[serde(default)]
    pub overrides: HashMap<Channel, f64>,
}

fn default_short_window() -> f64 {
    5.0
}

fn default_ppg_window() -> f64 {
    30.0
}

fn default_long_window() -> f64 {
    2000.0
}

fn default_sleep_window() -> f64 {
    30.0
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            eeg: default_short_window(),
            imu: default_short_window(),
            ppg_raw: default_ppg_window(),
            ppg_algo: default_long_window(),
            mental: default_long_window(),
            sleep_stage: default_sleep_window(),
            overrides: HashMap::new(),
        }
    }
}

impl WindowConfig {
    /// Window length in seconds for `channel`.
    pub fn seconds_for(&self, channel: Channel) -> f64 {
        if let Some(&seconds) = self.overrides.get(&channel) {
            return seconds;
        }
        match channel {
            Channel::Eeg => self.eeg,
            Channel::Accelerometer | Channel::Gyroscope | Channel::EulerAngle => self.imu,
            Channel::PpgRaw | Channel::Respiratory => self.ppg_raw,
            Channel::HeartRate
            | Channel::RrInterval
            | Channel::Spo2
            | Channel::Activity
            | Channel::Hrv
            | Channel::HrvStress
            | Channel::PpgStress => self.ppg_algo,
            Channel::Stress | Channel::Meditation => self.mental,
            Channel::SleepStage => self.sleep_stage,
        }
    }

    /// Window length for `channel`. Invalid values yield an empty window.
    pub fn window_for(&self, channel: Channel) -> Duration {
        Duration::try_from_secs_f64(self.seconds_for(channel)).unwrap_or(Duration::ZERO)
    }

    /// Override the window of a single channel.
    #[must_use]
    pub fn with_override(mut self, channel: Channel, seconds: f64) -> Self {
        self.overrides.insert(channel, seconds);
        self
    }

    /// Reject non-finite or non-positive windows.
    pub fn validate(&self) -> Result<()> {
        for channel in Channel::ALL {
            let seconds = self.seconds_for(channel);
            if !seconds.is_finite() || seconds <= 0.0 {
                return Err(Error::invalid_config(format!(
                    "window for {} must be a positive number of seconds, got {}",
                    channel, seconds
                )));
            }
        }
        Ok(())
    }
}

/// Configuration of a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Telemetry window lengths.
    #[serde(default)]
    pub windows: WindowConfig,

    /// Capacity of the session event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Pending commands older than this resolve as timed out.
    /// Disabled when absent.
    #[serde(default)]
    pub command_timeout_secs: Option<f64>,

    /// How often the command sweeper checks for expired commands.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: f64,
}

fn default_event_capacity() -> usize {
    100
}

fn default_sweep_interval() -> f64 {
    1.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            windows: WindowConfig::default(),
            event_capacity: default_event_capacity(),
            command_timeout_secs: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the telemetry windows.
    #[must_use]
    pub fn windows(mut self, windows: WindowConfig) -> Self {
        self.windows = windows;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Enable command timeouts.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    /// Set the sweep interval.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_secs = interval.as_secs_f64();
        self
    }

    /// Command timeout as a duration, if enabled.
    pub fn command_timeout_duration(&self) -> Option<Duration> {
        self.command_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Sweep interval as a duration.
    pub fn sweep_interval_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.sweep_interval_secs).unwrap_or(Duration::from_secs(1))
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        self.windows.validate()?;
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be at least 1"));
        }
        if let Some(timeout) = self.command_timeout_secs
            && (!timeout.is_finite() || timeout <= 0.0)
        {
            return Err(Error::invalid_config(format!(
                "command_timeout_secs must be positive, got {}",
                timeout
            )));
        }
        if !self.sweep_interval_secs.is_finite() || self.sweep_interval_secs <= 0.0 {
            return Err(Error::invalid_config(format!(
                "sweep_interval_secs must be positive, got {}",
                self.sweep_interval_secs
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::invalid_config(e.to_string()))
    }
}
