//! Grace-period closing of evicted handles
//!
//! A handle evicted from the cache may still be mid-operation in some
//! caller that fetched it just before the eviction. Instead of closing it
//! right away it is queued here with its eviction time, and a sweeper thread
//! closes it once `delay` has passed. Entries are appended in
//! non-decreasing time order, so a sweep stops at the first entry that is
//! not yet due.

use crate::clock::Clock;
use crate::handle::Closeable;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use fspool_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const THREAD_NAME: &str = "fspool-deferred-closer";

/// An evicted resource waiting for its grace period to end
pub struct PendingClose {
    resource: Arc<dyn Closeable>,
    evicted_at: Instant,
}

impl PendingClose {
    pub fn evicted_at(&self) -> Instant {
        self.evicted_at
    }

    pub fn resource(&self) -> &Arc<dyn Closeable> {
        &self.resource
    }
}

/// Counters exposed by the closer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloserStats {
    pub pending: usize,
    pub closed: u64,
    pub failed: u64,
}

struct CloserInner {
    queue: Mutex<VecDeque<PendingClose>>,
    delay: Duration,
    clock: Arc<dyn Clock>,
    stopped: AtomicBool,
    closed: AtomicU64,
    failed: AtomicU64,
}

impl CloserInner {
    fn take_due(&self) -> Vec<PendingClose> {
        let now = self.clock.now();
        let mut queue = self.queue.lock();
        let mut due = Vec::new();
        while let Some(front) = queue.front() {
            if now.saturating_duration_since(front.evicted_at) < self.delay {
                break;
            }
            if let Some(entry) = queue.pop_front() {
                due.push(entry);
            }
        }
        due
    }

    fn close(&self, entry: PendingClose) {
        let description = entry.resource.describe();
        let waited = self.clock.now().saturating_duration_since(entry.evicted_at);

        match catch_unwind(AssertUnwindSafe(|| entry.resource.close_once())) {
            Ok(Ok(true)) => {
                tracing::info!(
                    "Closed expired resource {} after {:?} (delay {:?})",
                    description,
                    waited,
                    self.delay
                );
                self.closed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Ok(false)) => {
                tracing::debug!("Expired resource {} was already closed", description);
            }
            Ok(Err(e)) => {
                tracing::error!("Close expired resource {} failed: {}", description, e);
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                tracing::error!("Close expired resource {} panicked", description);
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn sweep(&self) -> usize {
        let due = self.take_due();
        let count = due.len();
        for entry in due {
            self.close(entry);
        }
        count
    }
}

struct Sweeper {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Closes evicted resources after a grace window
pub struct DeferredCloser {
    inner: Arc<CloserInner>,
    sweep_interval: Duration,
    close_pending_on_shutdown: bool,
    sweeper: Mutex<Option<Sweeper>>,
}

impl DeferredCloser {
    pub fn new(
        delay: Duration,
        sweep_interval: Duration,
        close_pending_on_shutdown: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(CloserInner {
                queue: Mutex::new(VecDeque::new()),
                delay,
                clock,
                stopped: AtomicBool::new(false),
                closed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            sweep_interval,
            close_pending_on_shutdown,
            sweeper: Mutex::new(None),
        }
    }

    /// Spawn the sweeper thread. Calling it again is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() || self.inner.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (stop, stopped) = channel::bounded::<()>(1);
        let inner = Arc::clone(&self.inner);
        let interval = self.sweep_interval;
        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                tracing::debug!("Deferred closer started (interval {:?})", interval);
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            inner.sweep();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Deferred closer stopped");
            })
            .map_err(|e| Error::spawn(THREAD_NAME, e))?;

        *sweeper = Some(Sweeper { stop, thread });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Queue `resource` to be closed once the grace window has passed
    pub fn enqueue(&self, resource: Arc<dyn Closeable>) {
        let mut queue = self.inner.queue.lock();
        // Taking the timestamp under the lock keeps the queue time-ordered.
        let evicted_at = self.inner.clock.now();

        if !self.inner.stopped.load(Ordering::SeqCst) {
            tracing::info!(
                "Deferring close of {} by {:?}",
                resource.describe(),
                self.inner.delay
            );
            queue.push_back(PendingClose {
                resource,
                evicted_at,
            });
            return;
        }
        drop(queue);

        if self.close_pending_on_shutdown {
            tracing::debug!(
                "Deferred closer stopped; closing {} immediately",
                resource.describe()
            );
            self.inner.close(PendingClose {
                resource,
                evicted_at,
            });
        }
    }

    /// Close every entry whose grace window has elapsed; returns how many were processed
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    pub fn stats(&self) -> CloserStats {
        CloserStats {
            pending: self.pending(),
            closed: self.inner.closed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop the sweeper, then close or abandon whatever is still queued
    pub fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);

        if let Some(sweeper) = self.sweeper.lock().take() {
            let _ = sweeper.stop.try_send(());
            drop(sweeper.stop);
            if sweeper.thread.join().is_err() {
                tracing::error!("Deferred closer thread terminated abnormally");
            }
        }

        let remaining: Vec<PendingClose> = self.inner.queue.lock().drain(..).collect();
        if remaining.is_empty() {
            return;
        }
        if self.close_pending_on_shutdown {
            tracing::info!("Closing {} pending resources on shutdown", remaining.len());
            for entry in remaining {
                self.inner.close(entry);
            }
        } else {
            tracing::warn!(
                "Abandoning {} pending resources on shutdown",
                remaining.len()
            );
        }
    }
}

impl Drop for DeferredCloser {
    fn drop(&mut self) {
        self.shutdown();
    }
}
