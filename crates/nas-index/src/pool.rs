use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, SendError, Sender};
use tracing::{debug, error};

use crate::error::IndexResult;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool with an unbounded queue.
///
/// Once the pool is shut down, `execute` runs tasks on the calling thread.
/// `shutdown_now` discards queued tasks and does not wait for running ones;
/// a task stuck in a worker keeps that thread until it returns.
pub struct WorkerPool {
    name: String,
    threads: usize,
    sender: Option<Sender<Task>>,
    stopped: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(name: &str, threads: usize) -> IndexResult<Self> {
        let threads = threads.max(1);
        let (tx, rx) = unbounded::<Task>();
        let stopped = Arc::new(AtomicBool::new(false));

        for i in 0..threads {
            let rx = rx.clone();
            let stopped = Arc::clone(&stopped);
            let worker = format!("{name}-{i}");
            let _detached = thread::Builder::new().name(worker.clone()).spawn(move || {
                for task in rx {
                    if stopped.load(Ordering::SeqCst) {
                        continue;
                    }
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!(worker = %worker, "task panicked");
                    }
                }
                debug!(worker = %worker, "worker exiting");
            })?;
        }

        Ok(Self {
            name: name.to_string(),
            threads,
            sender: Some(tx),
            stopped,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.is_none()
    }

    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task: Task = Box::new(task);
        match &self.sender {
            Some(tx) => {
                if let Err(SendError(task)) = tx.send(task) {
                    task();
                }
            }
            None => {
                debug!(pool = %self.name, "pool shut down, running task inline");
                task();
            }
        }
    }

    /// Stop accepting work and drop everything still queued.
    pub fn shutdown_now(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.sender = None;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
