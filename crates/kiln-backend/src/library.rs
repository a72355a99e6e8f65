//! Process-wide library state.
//!
//! The library must be initialized before any subgraph or runtime is
//! created. Initialization is idempotent; callers that need balanced
//! init/deinit pairs keep their own reference count.

use crate::error::{BackendError, Result, Status};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static INITIALIZATION_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Initialize the library's global state.
///
/// Calling this while already initialized is a no-op that still succeeds.
pub fn initialize() -> Result<()> {
    if INITIALIZED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        let count = INITIALIZATION_COUNT.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(count, "backend library initialized");
    }
    Ok(())
}

/// Tear down the library's global state.
///
/// Runtimes created earlier stay valid; creating new ones fails until the
/// library is initialized again.
pub fn deinitialize() {
    if INITIALIZED.swap(false, Ordering::AcqRel) {
        tracing::debug!("backend library deinitialized");
    }
}

/// Whether [`initialize`] has run without a later [`deinitialize`].
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// How many times the library went from uninitialized to initialized.
pub fn initialization_count() -> usize {
    INITIALIZATION_COUNT.load(Ordering::Acquire)
}

pub(crate) fn ensure_initialized(operation: &str) -> Result<()> {
    if is_initialized() {
        Ok(())
    } else {
        Err(BackendError::new(
            Status::Uninitialized,
            format!("{operation} requires an initialized library"),
        ))
    }
}
