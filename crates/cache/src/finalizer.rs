//! Drop-triggered finalization
//!
//! [`FinalizationTracker::register`] returns a [`Registration`] that the
//! caller embeds in the object it wants tracked. When the last owner of
//! that object goes away the registration is dropped, which pushes the
//! matching cleanup onto a queue. A single named background thread waits on
//! the queue with a bounded timeout and runs each cleanup at most once.
//!
//! Cleanups must not capture the tracked object; doing so would keep it
//! alive forever.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use fspool_core::{Error, Result};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const THREAD_NAME: &str = "fspool-finalizer";

type Cleanup = Box<dyn FnOnce() -> Result<()> + Send>;

struct FinalizerEntry {
    id: u64,
    description: String,
    executed: AtomicBool,
    cleanup: Mutex<Option<Cleanup>>,
}

impl FinalizerEntry {
    /// Run the cleanup if no one has yet. Returns `None` when skipped.
    fn run(&self) -> Option<bool> {
        if self
            .executed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let cleanup = self.cleanup.lock().take()?;

        match catch_unwind(AssertUnwindSafe(cleanup)) {
            Ok(Ok(())) => {
                tracing::debug!("Finalized {}", self.description);
                Some(true)
            }
            Ok(Err(e)) => {
                tracing::error!("Error occurred when finalizing {}: {}", self.description, e);
                Some(false)
            }
            Err(_) => {
                tracing::error!("Cleanup for {} panicked", self.description);
                Some(false)
            }
        }
    }
}

struct TrackerInner {
    registry: DashMap<u64, Arc<FinalizerEntry>>,
    sender: Sender<Arc<FinalizerEntry>>,
    receiver: Receiver<Arc<FinalizerEntry>>,
    shutdown: AtomicBool,
    wait_timeout: Duration,
    next_id: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl TrackerInner {
    fn finalize(&self, entry: Arc<FinalizerEntry>) {
        self.registry.remove(&entry.id);
        match entry.run() {
            Some(true) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Some(false) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            None => {}
        }
    }

    fn drain(&self) -> usize {
        let mut processed = 0;
        while let Ok(entry) = self.receiver.try_recv() {
            self.finalize(entry);
            processed += 1;
        }
        processed
    }

    fn run_loop(&self) {
        tracing::debug!("Finalizer loop started");
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.receiver.recv_timeout(self.wait_timeout) {
                Ok(entry) => self.finalize(entry),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!("Finalizer loop stopped");
    }
}

/// Ties a cleanup to the lifetime of whatever owns this value
///
/// Dropping it schedules the cleanup on the finalizer thread. After the
/// tracker has shut down the cleanup runs inline on the dropping thread
/// instead, so it is never lost.
pub struct Registration {
    entry: Option<Arc<FinalizerEntry>>,
    tracker: Arc<TrackerInner>,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.entry.as_ref().map_or(0, |entry| entry.id)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };

        if self.tracker.shutdown.load(Ordering::SeqCst) {
            self.tracker.finalize(entry);
            return;
        }

        if let Err(channel::SendError(entry)) = self.tracker.sender.send(entry) {
            self.tracker.finalize(entry);
            return;
        }

        // Shutdown may have drained the queue between our check and the send.
        if self.tracker.shutdown.load(Ordering::SeqCst) {
            self.tracker.drain();
        }
    }
}

/// Counters exposed by the tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizerStats {
    pub tracked: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Runs cleanups for objects that became unreachable
pub struct FinalizationTracker {
    inner: Arc<TrackerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FinalizationTracker {
    /// Create a tracker whose loop waits at most `wait_timeout` per poll
    pub fn new(wait_timeout: Duration) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            inner: Arc::new(TrackerInner {
                registry: DashMap::new(),
                sender,
                receiver,
                shutdown: AtomicBool::new(false),
                wait_timeout,
                next_id: AtomicU64::new(1),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the background loop. Calling it again is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.inner.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || inner.run_loop())
            .map_err(|e| Error::spawn(THREAD_NAME, e))?;
        *worker = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some() && !self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Register `cleanup` to run once the returned registration is dropped
    pub fn register<F>(&self, description: impl Into<String>, cleanup: F) -> Registration
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(FinalizerEntry {
            id,
            description: description.into(),
            executed: AtomicBool::new(false),
            cleanup: Mutex::new(Some(Box::new(cleanup))),
        });
        self.inner.registry.insert(id, Arc::clone(&entry));

        Registration {
            entry: Some(entry),
            tracker: Arc::clone(&self.inner),
        }
    }

    /// Process every notification already queued, on the calling thread
    pub fn run_pending(&self) -> usize {
        self.inner.drain()
    }

    /// Registrations whose owners are still alive or not yet processed
    pub fn tracked(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn stats(&self) -> FinalizerStats {
        FinalizerStats {
            tracked: self.tracked(),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop the loop, wait for it, then finalize anything still queued
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Finalizer thread terminated abnormally");
            }
        }

        let drained = self.inner.drain();
        if drained > 0 {
            tracing::debug!("Finalized {} queued entries during shutdown", drained);
        }
        let abandoned = self.inner.registry.len();
        if abandoned > 0 {
            tracing::debug!(
                "{} tracked objects still alive at finalizer shutdown; they will be cleaned up inline when dropped",
                abandoned
            );
        }
    }
}

impl Drop for FinalizationTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
