//! Reference-counted ownership of the backend library.
//!
//! The backend has process-wide state that must be initialized before the
//! first graph is compiled and torn down after the last program is gone.
//! [`SharedContext`] counts live [`ContextHandle`]s under one lock: the
//! first acquisition initializes the library, the last release
//! deinitializes it.

use kiln_compiler::map_backend_error;
use kiln_core::Result;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Init/deinit hooks of a backend library.
///
/// The global context drives `kiln-backend`; tests substitute their own
/// library to observe or fail the transitions.
pub trait BackendLibrary: Send + Sync {
    fn initialize(&self) -> Result<()>;
    fn deinitialize(&self);
}

/// The `kiln-backend` library.
///
/// Its state is process-wide, so only [`SharedContext::global`] wraps it.
#[derive(Debug)]
pub(crate) struct NativeLibrary;

impl BackendLibrary for NativeLibrary {
    fn initialize(&self) -> Result<()> {
        kiln_backend::initialize().map_err(|err| map_backend_error(err, "initializing backend"))
    }

    fn deinitialize(&self) {
        kiln_backend::deinitialize();
    }
}

/// Reference count over a [`BackendLibrary`].
pub struct SharedContext {
    library: Box<dyn BackendLibrary>,
    ref_count: Mutex<usize>,
}

impl SharedContext {
    /// Create a context around a library. Nothing is initialized until the
    /// first [`acquire`](Self::acquire).
    ///
    /// The native backend is reachable only through [`global`](Self::global),
    /// so a second reference count over it cannot be built:
    ///
    /// ```compile_fail
    /// use kiln_runtime::{NativeLibrary, SharedContext};
    /// let _ = SharedContext::new(NativeLibrary);
    /// ```
    pub fn new(library: impl BackendLibrary + 'static) -> Self {
        Self {
            library: Box::new(library),
            ref_count: Mutex::new(0),
        }
    }

    /// The process-wide context over the `kiln-backend` library.
    pub fn global() -> Arc<SharedContext> {
        static GLOBAL: OnceLock<Arc<SharedContext>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SharedContext::new(NativeLibrary))))
    }

    /// Take a reference, initializing the library if this is the first one.
    ///
    /// # Errors
    ///
    /// Returns the library's error if initialization fails. The count is
    /// left at zero so a later call retries.
    pub fn acquire(self: &Arc<Self>) -> Result<ContextHandle> {
        let mut count = self.lock();
        if *count == 0 {
            if let Err(err) = self.library.initialize() {
                tracing::warn!(error = %err, "backend initialization failed");
                return Err(err);
            }
            tracing::info!("backend context initialized");
        }
        *count += 1;
        tracing::trace!(ref_count = *count, "acquired backend context");
        Ok(ContextHandle {
            shared: Arc::clone(self),
        })
    }

    /// Number of live handles.
    pub fn ref_count(&self) -> usize {
        *self.lock()
    }

    pub fn is_initialized(&self) -> bool {
        self.ref_count() > 0
    }

    fn release(&self) {
        let mut count = self.lock();
        // Handles are only minted by `acquire`, so the count is positive here.
        *count = count.saturating_sub(1);
        tracing::trace!(ref_count = *count, "released backend context");
        if *count == 0 {
            self.library.deinitialize();
            tracing::info!("backend context deinitialized");
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.ref_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedContext")
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

/// One reference to a [`SharedContext`]; released on drop.
#[derive(Debug)]
pub struct ContextHandle {
    shared: Arc<SharedContext>,
}

impl ContextHandle {
    /// The context this handle belongs to.
    pub fn shared(&self) -> &Arc<SharedContext> {
        &self.shared
    }

    /// Take another reference to the same context.
    ///
    /// Never re-runs initialization, since this handle keeps the count
    /// above zero.
    pub fn try_clone(&self) -> Result<ContextHandle> {
        self.shared.acquire()
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.shared.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Error;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLibrary {
        inits: AtomicUsize,
        deinits: AtomicUsize,
        fail_next: AtomicBool,
    }

    impl BackendLibrary for Arc<CountingLibrary> {
        fn initialize(&self) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(Error::Uninitialized("refused".to_string()));
            }
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn deinitialize(&self) {
            self.deinits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Arc<CountingLibrary>, Arc<SharedContext>) {
        let library = Arc::new(CountingLibrary::default());
        let shared = Arc::new(SharedContext::new(Arc::clone(&library)));
        (library, shared)
    }

    #[test]
    fn test_acquire_release_cycle() {
        let (library, shared) = counting();
        assert!(!shared.is_initialized());

        let handles: Vec<_> = (0..3).map(|_| shared.acquire().unwrap()).collect();
        assert_eq!(shared.ref_count(), 3);
        assert_eq!(library.inits.load(Ordering::SeqCst), 1);

        drop(handles);
        assert_eq!(shared.ref_count(), 0);
        assert!(!shared.is_initialized());
        assert_eq!(library.deinits.load(Ordering::SeqCst), 1);

        let _again = shared.acquire().unwrap();
        assert_eq!(library.inits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_init_can_be_retried() {
        let (library, shared) = counting();
        library.fail_next.store(true, Ordering::SeqCst);

        let err = shared.acquire().unwrap_err();
        assert_eq!(err.kind(), kiln_core::ErrorKind::Uninitialized);
        assert_eq!(shared.ref_count(), 0);
        assert_eq!(library.deinits.load(Ordering::SeqCst), 0);

        let handle = shared.acquire().unwrap();
        assert_eq!(shared.ref_count(), 1);
        drop(handle);
        assert_eq!(library.deinits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_clone_skips_init() {
        let (library, shared) = counting();
        let first = shared.acquire().unwrap();
        let second = first.try_clone().unwrap();
        assert_eq!(shared.ref_count(), 2);
        assert_eq!(library.inits.load(Ordering::SeqCst), 1);

        drop(first);
        assert!(shared.is_initialized());
        drop(second);
        assert_eq!(library.deinits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_acquire() {
        let (library, shared) = counting();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let handle = shared.acquire().unwrap();
                        drop(handle);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(shared.ref_count(), 0);
        assert_eq!(
            library.inits.load(Ordering::SeqCst),
            library.deinits.load(Ordering::SeqCst)
        );
    }
}
