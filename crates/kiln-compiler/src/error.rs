//! Mapping backend failures onto the shared error taxonomy.

use kiln_backend::{BackendError, Status};
use kiln_core::Error;

/// Convert a backend error, prefixing the message with what was being done.
///
/// The backend status stays in the message so callers can still see the raw
/// cause after the kind has been coarsened.
pub fn map_backend_error(err: BackendError, context: &str) -> Error {
    let message = format!("{context}: {err}");
    match err.status {
        Status::Uninitialized => Error::Uninitialized(message),
        Status::InvalidParameter => Error::InvalidParameter(message),
        Status::UnsupportedParameter | Status::UnsupportedHardware => Error::Unsupported(message),
        Status::OutOfMemory => Error::ResourceExhausted(message),
        Status::InvalidState | Status::Success => Error::InvalidState(message),
    }
}

/// `.context(...)`-style adapter for backend results.
pub trait BackendResultExt<T> {
    fn or_kiln_error(self, context: impl FnOnce() -> String) -> kiln_core::Result<T>;
}

impl<T> BackendResultExt<T> for kiln_backend::Result<T> {
    fn or_kiln_error(self, context: impl FnOnce() -> String) -> kiln_core::Result<T> {
        self.map_err(|err| map_backend_error(err, &context()))
    }
}
