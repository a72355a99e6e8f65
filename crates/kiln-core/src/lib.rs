//! Core graph model for Kiln.
//!
//! This crate provides the foundational abstractions that all other Kiln crates depend on:
//! - Typed, shaped operands and the operators that consume/produce them (`Operand`, `Operator`)
//! - An arena-backed `Graph` addressed by integer handles (`OperandId`, `OperatorId`)
//! - Pre-validated operator attribute bundles (`OperatorKind` and its option structs)
//! - A `GraphBuilder` that infers output descriptors while recording operators
//! - The error taxonomy shared by the compiler and the runtime
//!
//! Graphs are immutable once built. Operands can only reference operands that
//! already exist in the arena, so every built graph is acyclic by construction.

pub mod broadcast;
pub mod builder;
pub mod ir;
pub mod options;
pub mod types;

// Re-export commonly used types
pub use broadcast::broadcast_shape;
pub use builder::GraphBuilder;
pub use ir::{Graph, Operand, OperandId, OperandKind, Operator, OperatorId};
pub use options::{
    BinaryOp, ClampOptions, Conv2dOptions, FilterLayout, GemmOptions, InputLayout, OperatorKind,
    PadMode, PadOptions, Pool2dOptions, PoolKind, UnaryOp,
};
pub use types::{DataType, Element, OperandDescriptor};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
///
/// Callers that need to branch on the failure category (for example, to tell
/// an unsupported graph apart from a caller bug) match on this instead of
/// the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Uninitialized,
    InvalidParameter,
    InvalidState,
    Unsupported,
    ResourceExhausted,
}

/// Error type shared by graph construction, compilation and execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The backend library is not initialized.
    #[error("Backend not initialized: {0}")]
    Uninitialized(String),

    /// A shape, type or name does not fit the operation.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The API was used out of order (e.g. compute before build).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The backend cannot represent an operator or data type.
    #[error("Unsupported operator or type: {0}")]
    Unsupported(String),

    /// An allocation failed.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl Error {
    /// Get the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Uninitialized(_) => ErrorKind::Uninitialized,
            Error::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
        }
    }

    /// Get the human-readable message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::Uninitialized(msg)
            | Error::InvalidParameter(msg)
            | Error::InvalidState(msg)
            | Error::Unsupported(msg)
            | Error::ResourceExhausted(msg) => msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_and_message() {
        let err = Error::Unsupported("operator 'pow' is not supported".to_string());
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.message(), "operator 'pow' is not supported");
        assert_eq!(
            err.to_string(),
            "Unsupported operator or type: operator 'pow' is not supported"
        );
    }
}
