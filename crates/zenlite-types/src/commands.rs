//! Command parameters and per-domain response errors.
//!
//! Every configuration command accepted by the transport takes one of the
//! rate/mode enums below, and its asynchronous response carries one of the
//! `*ConfigError` enumerations. A `None` error means success.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

wire_enum! {
    /// System commands understood by the device firmware.
    pub enum SystemCommand {
        None = 0 => "none",
        /// Used when the device is in pairing mode.
        Pair = 1 => "pair",
        /// Sent right after a connection is established.
        ValidatePairInfo = 2 => "validate pair info",
        StartDataStream = 3 => "start data stream",
        StopDataStream = 4 => "stop data stream",
        Shutdown = 5 => "shutdown",
        EnterOta = 6 => "enter OTA",
        Reset = 7 => "reset",
        SetDeviceName = 8 => "set device name",
        SetSleepIdleTime = 9 => "set sleep idle time",
        GetSystemInfo = 10 => "get system info",
    }
}

wire_enum! {
    /// EEG (analog front end) sample rate.
    pub enum EegSampleRate {
        None = 0 => "none",
        Off = 1 => "off",
        Hz128 = 2 => "128 Hz",
        Hz256 = 3 => "256 Hz",
    }
}

impl EegSampleRate {
    /// Nominal rate in Hz, `None` when the stream is disabled.
    #[must_use]
    pub fn hz(self) -> Option<u32> {
        match self {
            EegSampleRate::Hz128 => Some(128),
            EegSampleRate::Hz256 => Some(256),
            EegSampleRate::None | EegSampleRate::Off => None,
        }
    }
}

wire_enum! {
    /// IMU sample rate.
    pub enum ImuSampleRate {
        None = 0 => "none",
        Off = 1 => "off",
        Hz25 = 2 => "25 Hz",
        Hz50 = 3 => "50 Hz",
        Hz100 = 4 => "100 Hz",
        Hz200 = 5 => "200 Hz",
        Hz400 = 6 => "400 Hz",
        Hz800 = 7 => "800 Hz",
    }
}

impl ImuSampleRate {
    /// Nominal rate in Hz, `None` when the stream is disabled.
    #[must_use]
    pub fn hz(self) -> Option<u32> {
        match self {
            ImuSampleRate::Hz25 => Some(25),
            ImuSampleRate::Hz50 => Some(50),
            ImuSampleRate::Hz100 => Some(100),
            ImuSampleRate::Hz200 => Some(200),
            ImuSampleRate::Hz400 => Some(400),
            ImuSampleRate::Hz800 => Some(800),
            ImuSampleRate::None | ImuSampleRate::Off => None,
        }
    }
}

wire_enum! {
    /// Which IMU sensors to stream.
    pub enum ImuMode {
        None = 0 => "none",
        Acc = 1 => "accelerometer",
        Gyro = 2 => "gyroscope",
        AccGyro = 3 => "accelerometer + gyroscope",
        Euler = 4 => "euler angles",
    }
}

wire_enum! {
    /// PPG report rate.
    pub enum PpgReportRate {
        None = 0 => "none",
        Off = 1 => "off",
        Hz1 = 2 => "1 Hz",
        Hz5 = 3 => "5 Hz",
        Hz25 = 4 => "25 Hz",
        Hz50 = 5 => "50 Hz",
        Hz100 = 6 => "100 Hz",
    }
}

impl PpgReportRate {
    /// Nominal rate in Hz, `None` when the stream is disabled.
    #[must_use]
    pub fn hz(self) -> Option<u32> {
        match self {
            PpgReportRate::Hz1 => Some(1),
            PpgReportRate::Hz5 => Some(5),
            PpgReportRate::Hz25 => Some(25),
            PpgReportRate::Hz50 => Some(50),
            PpgReportRate::Hz100 => Some(100),
            PpgReportRate::None | PpgReportRate::Off => None,
        }
    }
}

wire_enum! {
    /// PPG processing mode.
    pub enum PpgMode {
        None = 0 => "none",
        RawData = 1 => "raw data",
        Algo = 2 => "algorithm",
        Spo2 = 3 => "SpO2",
        Hr = 4 => "heart rate",
        Hrv = 5 => "HRV",
    }
}

wire_enum! {
    /// Selector for raw PPG register writes.
    pub enum PpgRawRegister {
        Register = 0 => "register",
        Value = 1 => "value",
    }
}

wire_enum! {
    /// Error carried by an AFE (and PPG) configuration response.
    pub enum AfeConfigError {
        None = 0 => "none",
        Unknown = 1 => "unknown",
        AfeConfig = 2 => "AFE config error",
    }
}

wire_enum! {
    /// Error carried by an IMU configuration response.
    pub enum ImuConfigError {
        None = 0 => "none",
        Unknown = 1 => "unknown",
        AccConfig = 2 => "accelerometer config error",
        GyroConfig = 3 => "gyroscope config error",
    }
}

wire_enum! {
    /// Error carried by a system command response.
    pub enum SysConfigError {
        None = 0 => "none",
        Unknown = 1 => "unknown",
        OtaFailedLowPower = 2 => "OTA failed: low power",
        PairError = 3 => "pair error",
        ValidatePairInfo = 4 => "validate pair info failed",
        AllowUpdate = 5 => "allow update",
        RecvOk = 6 => "received",
        UpdateComplete = 7 => "update complete",
    }
}

impl AfeConfigError {
    /// Whether the response reports success.
    #[must_use]
    pub fn is_success(self) -> bool {
        self == AfeConfigError::None
    }
}

impl ImuConfigError {
    /// Whether the response reports success.
    #[must_use]
    pub fn is_success(self) -> bool {
        self == ImuConfigError::None
    }
}

impl SysConfigError {
    /// Whether the response reports success.
    #[must_use]
    pub fn is_success(self) -> bool {
        self == SysConfigError::None
    }
}

/// The kind of an outstanding asynchronous command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CommandKind {
    /// EEG analog front end configuration.
    AfeConfig,
    /// IMU configuration.
    ImuConfig,
    /// PPG configuration.
    PpgConfig,
    /// Pairing handshake.
    Pair,
    /// Generic system command.
    SystemCommand,
    /// Device rename.
    Rename,
    /// Sleep idle time update.
    SleepIdle,
    /// Sleep mode toggle.
    SleepMode,
    /// System information query.
    SysInfo,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CommandKind::AfeConfig => "afe_config",
            CommandKind::ImuConfig => "imu_config",
            CommandKind::PpgConfig => "ppg_config",
            CommandKind::Pair => "pair",
            CommandKind::SystemCommand => "system_command",
            CommandKind::Rename => "rename",
            CommandKind::SleepIdle => "sleep_idle",
            CommandKind::SleepMode => "sleep_mode",
            CommandKind::SysInfo => "sys_info",
        };
        f.write_str(label)
    }
}

/// Asynchronous response to a configuration or system command.
///
/// Responses are delivered through the command's continuation whether they
/// report success or failure; check [`CommandResponse::is_success`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum CommandResponse {
    /// Response to an AFE, PPG, pairing, rename, sleep or sys-info command.
    Afe { error: AfeConfigError },
    /// Response to an IMU configuration command.
    Imu { error: ImuConfigError },
    /// Response to a system command, echoing the command it answers.
    System {
        command: SystemCommand,
        error: SysConfigError,
    },
}

impl CommandResponse {
    /// Whether the response reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            CommandResponse::Afe { error } => error.is_success(),
            CommandResponse::Imu { error } => error.is_success(),
            CommandResponse::System { error, .. } => error.is_success(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_hz() {
        assert_eq!(EegSampleRate::Hz256.hz(), Some(256));
        assert_eq!(EegSampleRate::Off.hz(), None);
        assert_eq!(ImuSampleRate::Hz50.hz(), Some(50));
        assert_eq!(PpgReportRate::Hz25.hz(), Some(25));
        assert_eq!(PpgReportRate::None.hz(), None);
    }

    #[test]
    fn test_command_response_success() {
        assert!(
            CommandResponse::Afe {
                error: AfeConfigError::None
            }
            .is_success()
        );
        assert!(
            !CommandResponse::Imu {
                error: ImuConfigError::GyroConfig
            }
            .is_success()
        );
        assert!(
            !CommandResponse::System {
                command: SystemCommand::Pair,
                error: SysConfigError::PairError,
            }
            .is_success()
        );
    }

    #[test]
    fn test_system_command_from_raw() {
        assert_eq!(SystemCommand::try_from(10), Ok(SystemCommand::GetSystemInfo));
        assert!(SystemCommand::try_from(11).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_command_response_serialization() {
        let response = CommandResponse::System {
            command: SystemCommand::StartDataStream,
            error: SysConfigError::None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"type\":\"system\""));
        let back: CommandResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
    }
}
