//! Worker pool queue
//!
//! A FIFO of pending jobs drained by a fixed set of named worker threads.
//! Threads are created once, on demand, by [`WorkerPool::create_threads`];
//! until then the pool rejects work instead of silently queueing it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// A unit of work executed by a [`WorkerPool`]
pub trait Job: Send + 'static {
    /// Execute the job on a worker thread
    fn run(self);

    /// Surface a job that was removed from the queue before it ran
    fn cancel(self, reason: Error);
}

struct PoolState<J> {
    label: Option<String>,
    sender: Option<Sender<J>>,
    receiver: Option<Receiver<J>>,
    workers: Vec<JoinHandle<()>>,
    shut_down: bool,
}

/// Set by `shutdown_now`; workers cancel whatever they receive afterwards
#[derive(Default)]
struct StopSignal {
    stopped: AtomicBool,
    cancelled: AtomicUsize,
}

impl StopSignal {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn cancel<J: Job>(&self, job: J, label: &str) {
        job.cancel(Error::Cancelled(format!("{label} shut down")));
        self.cancelled.fetch_add(1, Ordering::AcqRel);
    }
}

/// Bounded-concurrency executor for one bucket and direction
pub struct WorkerPool<J: Job> {
    state: Mutex<PoolState<J>>,
    alive: AtomicBool,
    stop: Arc<StopSignal>,
}

impl<J: Job> WorkerPool<J> {
    /// Create a pool with no worker threads
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                label: None,
                sender: None,
                receiver: None,
                workers: Vec::new(),
                shut_down: false,
            }),
            alive: AtomicBool::new(false),
            stop: Arc::new(StopSignal::default()),
        }
    }

    /// Whether worker threads exist and the pool accepts work
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Label the workers were created with
    pub fn label(&self) -> Option<String> {
        self.lock().label.clone()
    }

    /// Number of worker threads
    pub fn thread_count(&self) -> usize {
        self.lock().workers.len()
    }

    /// Number of jobs waiting for a worker
    pub fn pending_len(&self) -> usize {
        self.lock().receiver.as_ref().map_or(0, Receiver::len)
    }

    /// Spawn `count` workers named `{label}-{index}`
    ///
    /// A pool is started exactly once; a second call fails with
    /// [`Error::AlreadyStarted`] and leaves the running workers untouched.
    pub fn create_threads(&self, label: &str, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidThreadCount(count));
        }

        let mut state = self.lock();
        if state.sender.is_some() || state.shut_down {
            let current = state.label.clone().unwrap_or_else(|| label.to_string());
            return Err(Error::AlreadyStarted(current));
        }

        let (sender, receiver) = crossbeam_channel::unbounded::<J>();
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let receiver = receiver.clone();
            let stop = Arc::clone(&self.stop);
            let pool = label.to_string();
            let spawned = thread::Builder::new()
                .name(format!("{label}-{index}"))
                .spawn(move || worker_loop(receiver, stop, pool));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Workers already spawned exit once the sender is gone
                    drop(sender);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(Error::Io(e));
                }
            }
        }

        state.label = Some(label.to_string());
        state.sender = Some(sender);
        state.receiver = Some(receiver);
        state.workers = workers;
        self.alive.store(true, Ordering::Release);

        info!(pool = label, threads = count, "Worker pool started");
        Ok(())
    }

    /// Append a job to the queue
    pub fn add_item(&self, job: J) -> Result<()> {
        let state = self.lock();
        let Some(sender) = state.sender.as_ref() else {
            return Err(match (&state.label, state.shut_down) {
                (Some(label), true) => Error::ShuttingDown(label.clone()),
                _ => Error::NotInitialized("worker threads were never created".into()),
            });
        };

        sender.send(job).map_err(|_| {
            Error::ShuttingDown(state.label.clone().unwrap_or_default())
        })
    }

    /// Stop accepting jobs, let the workers finish everything already queued,
    /// then join them
    pub fn shutdown(&self) {
        let workers = {
            let mut state = self.lock();
            self.alive.store(false, Ordering::Release);
            state.shut_down = true;
            state.sender = None;
            state.receiver = None;
            std::mem::take(&mut state.workers)
        };

        join_workers(workers);
    }

    /// Stop accepting jobs and cancel every job still waiting for a worker
    ///
    /// Cancelled jobs are handed [`Error::Cancelled`]. Jobs already running
    /// finish normally; a worker that finishes one afterwards cancels
    /// whatever it dequeues next instead of running it. Returns the number
    /// of cancelled jobs.
    pub fn shutdown_now(&self) -> usize {
        let (label, receiver, workers) = {
            let mut state = self.lock();
            self.stop.stopped.store(true, Ordering::Release);
            self.alive.store(false, Ordering::Release);
            state.shut_down = true;
            state.sender = None;
            (
                state.label.clone().unwrap_or_default(),
                state.receiver.take(),
                std::mem::take(&mut state.workers),
            )
        };

        if let Some(receiver) = receiver {
            for job in receiver.try_iter() {
                self.stop.cancel(job, &label);
            }
        }
        join_workers(workers);

        let cancelled = self.stop.cancelled.load(Ordering::Acquire);
        if cancelled > 0 {
            warn!(pool = %label, cancelled, "Cancelled pending jobs");
        }
        cancelled
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<J>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<J: Job> Default for WorkerPool<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J: Job> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        if self.is_alive() {
            self.shutdown();
        }
    }
}

impl<J: Job> std::fmt::Debug for WorkerPool<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("WorkerPool")
            .field("label", &state.label)
            .field("threads", &state.workers.len())
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn worker_loop<J: Job>(receiver: Receiver<J>, stop: Arc<StopSignal>, pool: String) {
    let name = thread::current().name().unwrap_or("worker").to_string();
    debug!(worker = %name, "Worker started");

    while let Ok(job) = receiver.recv() {
        if stop.is_stopped() {
            stop.cancel(job, &pool);
            continue;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
            error!(
                worker = %name,
                panic = panic_message(payload.as_ref()),
                "Job panicked"
            );
        }
    }

    debug!(worker = %name, "Worker exiting");
}

fn join_workers(workers: Vec<JoinHandle<()>>) {
    let current = thread::current().id();
    for handle in workers {
        // A worker shutting down its own pool cannot wait for itself
        if handle.thread().id() == current {
            continue;
        }
        if handle.join().is_err() {
            warn!("Worker thread terminated abnormally");
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
