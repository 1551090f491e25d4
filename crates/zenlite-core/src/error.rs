//! Error types for zenlite-core.
//!
//! Synchronous failures (a transport call refused, a command issued before
//! connecting, an illegal connectivity transition) surface here as typed
//! results. Asynchronous failures never do: per-domain configuration errors
//! travel inside [`zenlite_types::CommandResponse`] through the command's
//! continuation, and events for unknown devices become
//! [`DispatchError`]s that are counted and dropped by the dispatcher.
//!
//! | Error | Typical cause | Caller action |
//! |-------|---------------|---------------|
//! | [`Error::Transport`] | The transport refused a command | Inspect the code, maybe retry |
//! | [`Error::NotConnected`] | Command issued without a bound handle | Connect first |
//! | [`Error::DeviceNotFound`] | Uuid never discovered | Scan first |
//! | [`Error::HandleAlreadyBound`] | Double bind, a programming error | Unbind first |
//! | [`Error::InvalidTransition`] | Connect while connecting, and so on | Wait for the next connectivity event |
//! | [`Error::ConnectionFailed`] | Transport returned no handle | Retry the connect |
//! | [`Error::InvalidConfig`] | Bad [`crate::SessionConfig`] or argument | Fix and retry |

use thiserror::Error;

use zenlite_types::{Connectivity, ErrorCode};

/// Errors returned by session, registry and correlator operations.
///
/// `#[non_exhaustive]`: transport failures keep gaining variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport rejected a call with a non-positive code.
    #[error("Transport error {code}: {message}")]
    Transport {
        /// Raw code returned by the transport.
        code: i32,
        /// Human-readable description of the code.
        message: String,
    },

    /// Operation requires a bound native handle.
    #[error("Device {0} is not connected")]
    NotConnected(String),

    /// The uuid is not present in the registry.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A handle is already bound for this device.
    #[error("Device {0} already has a bound handle")]
    HandleAlreadyBound(String),

    /// The requested action is not allowed from the current state.
    #[error("Cannot {action} device {uuid} while {from}")]
    InvalidTransition {
        /// Device identifier.
        uuid: String,
        /// State the device was in.
        from: Connectivity,
        /// The rejected action.
        action: &'static str,
    },

    /// The transport did not produce a handle.
    #[error("Connection to {0} failed")]
    ConnectionFailed(String),

    /// Invalid configuration or argument.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A wire value could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// I/O error, e.g. while reading a config file.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// Create a transport error using the built-in message table.
    pub fn transport(code: i32) -> Self {
        Self::Transport {
            code,
            message: ErrorCode::describe(code),
        }
    }

    /// Create a not-connected error.
    pub fn not_connected(uuid: impl Into<String>) -> Self {
        Self::NotConnected(uuid.into())
    }

    /// Create a device-not-found error.
    pub fn device_not_found(uuid: impl Into<String>) -> Self {
        Self::DeviceNotFound(uuid.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// The typed transport code, if this is a transport error with a known code.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Transport { code, .. } => ErrorCode::try_from(*code).ok(),
            _ => None,
        }
    }
}

impl From<zenlite_types::ParseError> for Error {
    fn from(err: zenlite_types::ParseError) -> Self {
        match err {
            zenlite_types::ParseError::InvalidData(msg) => Error::InvalidData(msg),
            // Handle future ParseError variants (non_exhaustive)
            other => Error::InvalidData(other.to_string()),
        }
    }
}

/// Result type alias using zenlite-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// An inbound event that could not be routed.
///
/// Dispatch errors are operational anomalies: the dispatcher counts and logs
/// them and drops the event. They are never returned to command callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// The event names a device the registry has never seen.
    #[error("{event} event for unknown device {uuid}")]
    UnknownDevice {
        /// Device identifier carried by the event.
        uuid: String,
        /// Short name of the event kind.
        event: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_connected("zl-1");
        assert_eq!(err.to_string(), "Device zl-1 is not connected");

        let err = Error::transport(-160);
        assert_eq!(
            err.to_string(),
            "Transport error -160: Device is not connected"
        );

        let err = Error::InvalidTransition {
            uuid: "zl-1".into(),
            from: Connectivity::Connecting,
            action: "connect",
        };
        assert_eq!(err.to_string(), "Cannot connect device zl-1 while connecting");
    }

    #[test]
    fn test_transport_error_code() {
        assert_eq!(
            Error::transport(-129).error_code(),
            Some(ErrorCode::BleDisabled)
        );
        assert_eq!(Error::transport(-4242).error_code(), None);
        assert_eq!(Error::not_connected("x").error_code(), None);
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = zenlite_types::ParseError::UnknownValue {
            kind: "Connectivity",
            value: 9,
        }
        .into();
        assert!(matches!(err, Error::InvalidData(ref m) if m.contains("Connectivity")));
    }

    #[test]
    fn test_dispatch_error_display() {
        let err = DispatchError::UnknownDevice {
            uuid: "ghost".into(),
            event: "eeg",
        };
        assert_eq!(err.to_string(), "eeg event for unknown device ghost");
    }

    #[test]
    fn test_config_parse_error_conversion() {
        let parse_err = toml::from_str::<toml::Value>("not = [valid").unwrap_err();
        let err: Error = parse_err.into();
        assert!(err.to_string().starts_with("Failed to parse configuration"));
    }
}
