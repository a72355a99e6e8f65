//! Status codes and the backend error type.

use std::fmt;
use thiserror::Error;

/// Outcome of a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Uninitialized,
    InvalidParameter,
    InvalidState,
    UnsupportedParameter,
    UnsupportedHardware,
    OutOfMemory,
}

impl Status {
    pub fn name(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Uninitialized => "uninitialized",
            Status::InvalidParameter => "invalid parameter",
            Status::InvalidState => "invalid state",
            Status::UnsupportedParameter => "unsupported parameter",
            Status::UnsupportedHardware => "unsupported hardware",
            Status::OutOfMemory => "out of memory",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failed backend call: the status plus what went wrong.
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct BackendError {
    pub status: Status,
    pub message: String,
}

impl BackendError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(Status::InvalidParameter, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(Status::InvalidState, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(Status::UnsupportedParameter, message)
    }
}

/// Specialized Result type for backend calls.
pub type Result<T> = std::result::Result<T, BackendError>;
