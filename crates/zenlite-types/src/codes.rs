//! Transport error codes and hardware fault codes.

wire_enum! {
    /// Error codes returned synchronously by transport calls.
    ///
    /// Command calls return a positive correlation id on success and one of
    /// these (non-positive) codes on failure.
    pub enum ErrorCode {
        None = 0 => "none",
        Unknown = -1 => "unknown",
        InvalidParams = -2 => "invalid params",
        InvalidData = -3 => "invalid data",
        SystemIsBusy = -11 => "system is busy",
        ScanFailed = -64 => "scan failed",
        ScanFeatureUnsupported = -65 => "scan feature unsupported",
        MainServiceUnsupported = -66 => "main service unsupported",
        BleDeviceUnreachable = -128 => "BLE device unreachable",
        BleDisabled = -129 => "BLE disabled",
        BleUnavailable = -130 => "BLE unavailable",
        BleDataWriteFailure = -131 => "BLE data write failure",
        DeviceNotConnected = -160 => "device not connected",
        DeviceUuidUnavailable = -196 => "device UUID unavailable",
        EegInit = -1002 => "EEG init",
        ImuInit = -1003 => "IMU init",
        PpgInit = -1004 => "PPG init",
        BatteryVoltage = -1005 => "battery voltage",
        BatteryTemperature = -1006 => "battery temperature",
        HardwareVersion = -1007 => "hardware version",
        FlashInit = -1008 => "flash init",
        BleInit = -1009 => "BLE init",
    }
}

impl ErrorCode {
    /// Human-readable description of this code.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::None => "Success",
            ErrorCode::Unknown => "Unknown error",
            ErrorCode::InvalidParams => "Invalid parameters",
            ErrorCode::InvalidData => "Invalid data",
            ErrorCode::SystemIsBusy => "System is busy",
            ErrorCode::ScanFailed => "BLE scan failed",
            ErrorCode::ScanFeatureUnsupported => "BLE scan feature is not supported",
            ErrorCode::MainServiceUnsupported => "Device main service is not supported",
            ErrorCode::BleDeviceUnreachable => "BLE device is unreachable",
            ErrorCode::BleDisabled => "Bluetooth is disabled",
            ErrorCode::BleUnavailable => "Bluetooth is unavailable",
            ErrorCode::BleDataWriteFailure => "Failed to write data to the device",
            ErrorCode::DeviceNotConnected => "Device is not connected",
            ErrorCode::DeviceUuidUnavailable => "Device UUID is unavailable",
            ErrorCode::EegInit => "EEG sensor failed to initialize",
            ErrorCode::ImuInit => "IMU sensor failed to initialize",
            ErrorCode::PpgInit => "PPG sensor failed to initialize",
            ErrorCode::BatteryVoltage => "Abnormal battery voltage",
            ErrorCode::BatteryTemperature => "Abnormal battery temperature",
            ErrorCode::HardwareVersion => "Unsupported hardware version",
            ErrorCode::FlashInit => "Flash storage failed to initialize",
            ErrorCode::BleInit => "BLE module failed to initialize",
        }
    }

    /// Describe a raw code, including codes this crate does not know about.
    #[must_use]
    pub fn describe(code: i32) -> String {
        match ErrorCode::try_from(code) {
            Ok(known) => known.message().to_string(),
            Err(_) => format!("Unrecognized error code {}", code),
        }
    }
}

wire_enum! {
    /// Hardware faults reported in the system information record.
    pub enum HardwareError {
        None = 0 => "none",
        Unknown = 1 => "unknown",
        Eeg = 2 => "EEG",
        Imu = 3 => "IMU",
        Magnetometer = 4 => "magnetometer",
        AbnormalBatteryVoltage = 5 => "abnormal battery voltage",
    }
}
