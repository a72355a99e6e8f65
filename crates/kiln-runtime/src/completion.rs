//! Where asynchronous results are delivered.
//!
//! A worker finishes a build or compute and hands the caller's callback to
//! a [`CompletionContext`]. The context decides which thread runs it.

use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// A deferred callback.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Receives finished callbacks from worker threads.
pub trait CompletionContext: Send + Sync {
    fn post(&self, task: Task);
}

/// Runs callbacks immediately on the worker that finished the job.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineCompletion;

impl CompletionContext for InlineCompletion {
    fn post(&self, task: Task) {
        task();
    }
}

/// Queues callbacks until the owning thread drains them.
///
/// Typically one per event loop: workers post, the loop calls
/// [`run_pending`](Self::run_pending) or [`run_one`](Self::run_one).
#[derive(Debug)]
pub struct ChannelCompletion {
    sender: mpsc::Sender<Task>,
    receiver: Mutex<mpsc::Receiver<Task>>,
}

impl ChannelCompletion {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Run every queued callback without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.next(|receiver| receiver.try_recv().ok()) {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one callback and run it.
    ///
    /// Returns `false` if nothing arrived in time.
    pub fn run_one(&self, timeout: Duration) -> bool {
        match self.next(|receiver| receiver.recv_timeout(timeout).ok()) {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    // The lock is released before the task runs so callbacks may post again.
    fn next(&self, take: impl FnOnce(&mpsc::Receiver<Task>) -> Option<Task>) -> Option<Task> {
        let receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        take(&receiver)
    }
}

impl Default for ChannelCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionContext for ChannelCompletion {
    fn post(&self, task: Task) {
        // The receiver lives in `self`, so the channel cannot be closed here.
        if let Err(mpsc::SendError(task)) = self.sender.send(task) {
            task();
        }
    }
}
