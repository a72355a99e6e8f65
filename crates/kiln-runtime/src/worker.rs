//! Fixed-size thread pool for asynchronous builds and computes.

use kiln_core::{Error, Result};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker threads fed from one shared queue.
///
/// Jobs run in submission order per worker, with no ordering between
/// workers. Dropping the pool lets queued jobs finish, then joins every
/// thread. When the last owner drops it from inside a job, the running
/// worker is detached instead and exits once the queue drains.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one).
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` if the OS refuses to spawn a thread.
    pub fn new(threads: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("kiln-worker-{index}"))
                .spawn(move || worker_loop(&receiver))
                .map_err(|err| {
                    Error::ResourceExhausted(format!("spawning worker thread {index}: {err}"))
                })?;
            workers.push(handle);
        }

        tracing::debug!(threads = workers.len(), "started worker pool");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job.
    ///
    /// If every worker is gone the job runs on the calling thread, so a
    /// queued callback is never lost.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        let rejected = match &self.sender {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                Err(mpsc::SendError(job)) => job,
            },
            None => job,
        };
        tracing::warn!("worker pool is closed, running job inline");
        rejected();
    }
}

fn worker_loop(receiver: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        let job = {
            let receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
            receiver.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue ends each worker loop once it drains.
        self.sender.take();
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() == current {
                tracing::debug!("worker pool dropped on its own thread, detaching it");
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_runs_all_jobs_before_drop_returns() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(3).unwrap();
        assert_eq!(pool.size(), 3);

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_zero_threads_means_one() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_jobs_run_off_the_calling_thread() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.execute(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        });
        assert_eq!(rx.recv().unwrap().as_deref(), Some("kiln-worker-0"));
    }

    #[test]
    fn test_last_owner_dropped_inside_job() {
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let owned = Arc::clone(&pool);
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.execute(move || {
            go_rx.recv().unwrap();
            drop(owned);
            done_tx.send(()).unwrap();
        });
        let queued = Arc::clone(&counter);
        pool.execute(move || {
            queued.fetch_add(1, Ordering::SeqCst);
        });
        drop(pool);
        go_tx.send(()).unwrap();

        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        // The detached worker still drains what was queued behind it.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
