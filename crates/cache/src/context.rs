//! Owner of the background workers shared by one or more caches

use crate::backend::BackendFactory;
use crate::clock::{Clock, SystemClock};
use crate::closer::DeferredCloser;
use crate::config::CacheConfig;
use crate::finalizer::FinalizationTracker;
use crate::resource_cache::ResourceCache;
use fspool_core::Result;
use std::sync::Arc;

/// Finalizer, deferred closer and clock for a set of caches
///
/// Dropping the context shuts both workers down.
pub struct CacheContext {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    finalizer: Arc<FinalizationTracker>,
    closer: Arc<DeferredCloser>,
}

impl CacheContext {
    /// Validate `config` and start both workers on the system clock
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new) but timestamps evictions with `clock`
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let context = Self::detached(config, clock)?;
        context.start()?;
        Ok(context)
    }

    /// Build the workers without spawning their threads
    ///
    /// Nothing runs until [`start`](Self::start), or until the caller drives
    /// [`FinalizationTracker::run_pending`] and [`DeferredCloser::sweep`] itself.
    pub fn detached(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let finalizer = Arc::new(FinalizationTracker::new(config.finalizer_wait_timeout));
        let closer = Arc::new(DeferredCloser::new(
            config.deferred_close_delay,
            config.deferred_close_sweep_interval,
            config.close_pending_on_shutdown,
            Arc::clone(&clock),
        ));

        Ok(Self {
            config,
            clock,
            finalizer,
            closer,
        })
    }

    pub fn start(&self) -> Result<()> {
        self.finalizer.start()?;
        self.closer.start()?;
        tracing::info!(
            "Handle cache workers started (max size {}, close delay {:?})",
            self.config.max_cache_size,
            self.config.deferred_close_delay
        );
        Ok(())
    }

    /// A cache that creates handles through `factory`
    pub fn cache<F: BackendFactory>(&self, factory: F) -> ResourceCache<F> {
        ResourceCache::new(
            factory,
            self.config.clone(),
            Arc::clone(&self.finalizer),
            Arc::clone(&self.closer),
            Arc::clone(&self.clock),
        )
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn finalizer(&self) -> &Arc<FinalizationTracker> {
        &self.finalizer
    }

    pub fn closer(&self) -> &Arc<DeferredCloser> {
        &self.closer
    }

    /// Stop the closer, then the finalizer. Safe to call more than once.
    pub fn shutdown(&self) {
        self.closer.shutdown();
        self.finalizer.shutdown();
    }
}

impl Drop for CacheContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
