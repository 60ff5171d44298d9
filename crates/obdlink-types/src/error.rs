//! Error types for target parsing.

use thiserror::Error;

/// Errors produced while parsing a [`crate::DeviceTarget`] from its string
/// form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TargetError {
    /// The target string (or its host part) was empty.
    #[error("device target is empty")]
    Empty,

    /// The port part of a network target was not a valid u16.
    #[error("invalid port '{port}': must be a number 1-65535")]
    InvalidPort { port: String },
}

/// Result alias for target parsing.
pub type TargetResult<T> = Result<T, TargetError>;
