//! Error types for decoding ZenLite wire values.

use thiserror::Error;

/// Errors that can occur when converting raw native values into typed ones.
///
/// Transport failures are reported by zenlite-core, not here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A native integer did not match any variant of the target enum.
    #[error("unknown {kind} value: {value}")]
    UnknownValue {
        /// Name of the enum being decoded.
        kind: &'static str,
        /// The raw value received.
        value: i32,
    },

    /// A record failed a structural check (e.g. mismatched axis lengths).
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using zenlite-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
