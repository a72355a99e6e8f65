//! Context configuration.

use std::env;

/// Environment variable overriding [`ContextOptions::worker_threads`].
pub const WORKER_THREADS_ENV: &str = "KILN_WORKER_THREADS";

const MAX_DEFAULT_WORKERS: usize = 4;

/// Settings for a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    /// Threads serving `build_async` and `compute_async`. At least one.
    pub worker_threads: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get().min(MAX_DEFAULT_WORKERS))
            .unwrap_or(1);
        Self {
            worker_threads: threads,
        }
    }
}

impl ContextOptions {
    /// Defaults, overridden by `KILN_WORKER_THREADS` when it holds a
    /// positive integer. Other values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        match env::var(WORKER_THREADS_ENV) {
            Ok(value) if !value.trim().is_empty() => match parse_worker_threads(&value) {
                Some(threads) => options.worker_threads = threads,
                None => tracing::warn!(
                    value = value.as_str(),
                    "ignoring {WORKER_THREADS_ENV}: expected a positive integer"
                ),
            },
            _ => {}
        }
        options
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }
}

fn parse_worker_threads(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|&n| n > 0)
}
