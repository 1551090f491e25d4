//! Platform-agnostic types for ZenLite EEG/PPG headbands.
//!
//! This crate holds the wire-level vocabulary shared by every layer that
//! talks to a ZenLite transport: the native enumerations (with their integer
//! discriminants), the telemetry records delivered by the device, and the
//! transport error code table.
//!
//! # Features
//!
//! - `serde` (default): `Serialize`/`Deserialize` for every type
//!
//! # Example
//!
//! ```
//! use zenlite_types::{Connectivity, ErrorCode};
//!
//! let state = Connectivity::try_from(1).unwrap();
//! assert_eq!(state, Connectivity::Connected);
//! assert_eq!(ErrorCode::describe(-160), "Device is not connected");
//! ```

#[macro_use]
mod macros;

pub mod codes;
pub mod commands;
pub mod error;
pub mod telemetry;
pub mod types;

pub use codes::{ErrorCode, HardwareError};
pub use commands::{
    AfeConfigError, CommandKind, CommandResponse, EegSampleRate, ImuConfigError, ImuMode,
    ImuSampleRate, PpgMode, PpgRawRegister, PpgReportRate, SysConfigError, SystemCommand,
};
pub use error::{ParseError, ParseResult};
pub use telemetry::{
    BrainWave, DeviceInfo, EegData, EulerAngleData, ImuData, MotionData, Point3, PpgAlgoSample,
    PpgData, PpgRawSample, RespiratoryRecord, ScanResult, SleepReport, SysInfo,
};
pub use types::{
    BodyPose, Connectivity, ContactState, DeviceEvent, EegContactState, HeadPose, Orientation,
    PpgActivity, PpgContactState, RespiratoryState, SleepStage, Spo2State,
};
