//! Keyed cache of backend handles
//!
//! Lookups, creations, evictions and bulk closes all run under one
//! exclusive lock, so at most one handle is ever created per key. Evicted
//! handles go to the [`DeferredCloser`]; handles nobody references any more
//! are closed by the [`FinalizationTracker`]. Both paths share the slot's
//! one-shot close guard.

use crate::backend::BackendFactory;
use crate::clock::Clock;
use crate::closer::DeferredCloser;
use crate::config::CacheConfig;
use crate::finalizer::FinalizationTracker;
use crate::handle::{Closeable, Handle, ResourceSlot};
use crate::key::{credential_tokens, CacheKey};
use crate::statistics::{CacheStatistics, StatsRecorder};
use fspool_core::telemetry::lookup_span;
use fspool_core::{CredentialTokenSet, Error, IdentityProvider, Principal, Result, Target};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A cached handle plus the credentials it was opened with
struct HandleEntry<R> {
    handle: Handle<R>,
    credentials: CredentialTokenSet,
    created_at: Instant,
}

/// Bulk-close variants kept for interface compatibility; none are supported
#[derive(Debug, Clone)]
pub enum CloseFilter {
    /// Only handles flagged for automatic close
    AutomaticOnly,
    /// Only handles opened for one principal
    Principal(Principal),
}

impl fmt::Display for CloseFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseFilter::AutomaticOnly => write!(f, "close_all(automatic only)"),
            CloseFilter::Principal(principal) => write!(f, "close_all(principal {principal})"),
        }
    }
}

/// Shared cache of backend handles keyed by target and principal
pub struct ResourceCache<F: BackendFactory> {
    factory: F,
    config: CacheConfig,
    finalizer: Arc<FinalizationTracker>,
    closer: Arc<DeferredCloser>,
    clock: Arc<dyn Clock>,
    identity: Option<Arc<dyn IdentityProvider>>,
    next_unique: AtomicU64,
    entries: Mutex<HashMap<CacheKey, HandleEntry<F::Resource>>>,
    stats: StatsRecorder,
}

impl<F: BackendFactory> ResourceCache<F> {
    pub fn new(
        factory: F,
        config: CacheConfig,
        finalizer: Arc<FinalizationTracker>,
        closer: Arc<DeferredCloser>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            factory,
            config,
            finalizer,
            closer,
            clock,
            identity: None,
            next_unique: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            stats: StatsRecorder::default(),
        }
    }

    /// Resolve the principal for [`get_current`](Self::get_current) through `provider`
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    /// Shared handle for `target` as `principal`
    ///
    /// Repeated calls with unchanged credentials return the same resource.
    /// A credential change on an identity-sensitive scheme evicts the cached
    /// handle and creates a new one.
    pub fn get(&self, target: &Target, principal: &Principal) -> Result<Handle<F::Resource>> {
        let key = CacheKey::derive(target, principal, 0)?;
        self.get_internal(target, principal, key)
    }

    /// Private handle for `target` as `principal`, never returned to anyone else
    pub fn get_exclusive(
        &self,
        target: &Target,
        principal: &Principal,
    ) -> Result<Handle<F::Resource>> {
        let unique = self.next_unique.fetch_add(1, Ordering::SeqCst);
        let key = CacheKey::derive(target, principal, unique)?;
        self.get_internal(target, principal, key)
    }

    /// [`get`](Self::get) for the principal reported by the identity provider
    pub fn get_current(&self, target: &Target) -> Result<Handle<F::Resource>> {
        let principal = self.current_principal()?;
        self.get(target, &principal)
    }

    /// [`get_exclusive`](Self::get_exclusive) for the principal reported by the identity provider
    pub fn get_exclusive_current(&self, target: &Target) -> Result<Handle<F::Resource>> {
        let principal = self.current_principal()?;
        self.get_exclusive(target, &principal)
    }

    fn current_principal(&self) -> Result<Principal> {
        self.identity
            .as_ref()
            .ok_or_else(|| Error::configuration("no identity provider configured for the cache"))?
            .current_principal()
    }

    fn get_internal(
        &self,
        target: &Target,
        principal: &Principal,
        key: CacheKey,
    ) -> Result<Handle<F::Resource>> {
        let _span = lookup_span(&key.to_string(), key.is_exclusive()).entered();
        let credentials = credential_tokens(principal)?;
        let mut entries = self.entries.lock();

        let rotated = match entries.get(&key) {
            Some(entry) if entry.handle.is_closed() => {
                tracing::debug!(
                    "Dropping closed handle {} for {}",
                    entry.handle.id(),
                    key
                );
                entries.remove(&key);
                false
            }
            Some(entry) => {
                if !self.credentials_changed(&key, entry, &credentials) {
                    self.stats.record_hit();
                    return Ok(entry.handle.clone());
                }
                true
            }
            None => false,
        };

        if rotated {
            if let Some(old) = entries.remove(&key) {
                tracing::info!(
                    "Credentials changed for {}; replacing handle {} created {:?} ago",
                    key,
                    old.handle.id(),
                    self.clock.now().saturating_duration_since(old.created_at)
                );
                self.closer.enqueue(old.handle.closeable());
                self.stats.record_rotation();
                self.stats.record_eviction();
            }
        } else {
            if entries.len() >= self.config.max_cache_size {
                entries.retain(|_, entry| !entry.handle.is_closed());
            }
            if entries.len() >= self.config.max_cache_size {
                self.stats.record_capacity_rejection();
                tracing::warn!(
                    "Handle cache is full ({} entries); rejecting {}",
                    entries.len(),
                    key
                );
                return Err(Error::cache_full(self.config.max_cache_size));
            }
            self.stats.record_miss();
        }

        let handle = self.create_handle(target, &key)?;
        entries.insert(
            key,
            HandleEntry {
                handle: handle.clone(),
                credentials,
                created_at: self.clock.now(),
            },
        );
        Ok(handle)
    }

    fn credentials_changed(
        &self,
        key: &CacheKey,
        entry: &HandleEntry<F::Resource>,
        current: &CredentialTokenSet,
    ) -> bool {
        self.config.is_identity_sensitive(key.scheme()) && entry.credentials != *current
    }

    fn create_handle(&self, target: &Target, key: &CacheKey) -> Result<Handle<F::Resource>> {
        let resource = match self.factory.create(target, &self.config.backend) {
            Ok(resource) => resource,
            Err(e) => {
                self.stats.record_creation_failure();
                tracing::error!("Failed to create backend handle for {}: {}", key, e);
                return Err(Error::backend_create_failed(target.to_string(), e));
            }
        };

        let slot = Arc::new(ResourceSlot::new(target.to_string(), resource));
        let cleanup_slot = Arc::clone(&slot);
        let registration = self.finalizer.register(format!("handle {}", key), move || {
            cleanup_slot.close_once().map(|_| ())
        });

        self.stats.record_creation();
        tracing::debug!("Created backend handle {} for {}", slot.id(), key);
        Ok(Handle::new(slot, registration))
    }

    /// Evict the entry holding `handle`'s resource; returns whether one was found
    ///
    /// The resource is closed by the deferred closer once its grace window
    /// has passed, not here.
    pub fn remove(&self, handle: &Handle<F::Resource>) -> bool {
        let Some(entry) = self.take_entry(handle) else {
            return false;
        };
        tracing::debug!("Removed handle {} from the cache", entry.handle.id());
        self.closer.enqueue(entry.handle.closeable());
        self.stats.record_eviction();
        true
    }

    /// Evict `handle`'s entry, if any, and close the resource right away
    ///
    /// Returns `Ok(false)` when the resource was already closed. The next
    /// lookup for the same key creates a new handle.
    pub fn close(&self, handle: &Handle<F::Resource>) -> Result<bool> {
        if self.take_entry(handle).is_some() {
            tracing::debug!("Closing handle {} on request", handle.id());
            self.stats.record_eviction();
        }
        handle.close()
    }

    fn take_entry(&self, handle: &Handle<F::Resource>) -> Option<HandleEntry<F::Resource>> {
        let mut entries = self.entries.lock();
        let key = entries
            .iter()
            .find(|(_, entry)| entry.handle.same_resource(handle))
            .map(|(key, _)| key.clone())?;
        entries.remove(&key)
    }

    /// Close every cached handle now and empty the cache
    ///
    /// Every close is attempted; the first failure is returned.
    pub fn close_all_shared(&self) -> Result<()> {
        let mut entries = self.entries.lock();
        let count = entries.len();
        let mut first_error = None;

        for (key, entry) in entries.drain() {
            if let Err(e) = entry.handle.close() {
                tracing::error!("Failed to close handle for {}: {}", key, e);
                first_error.get_or_insert(e);
            }
        }

        tracing::info!("Closed {} cached handles", count);
        first_error.map_or(Ok(()), Err)
    }

    /// Always fails with [`Error::UnsupportedOperation`]
    pub fn close_all_filtered(&self, filter: CloseFilter) -> Result<()> {
        Err(Error::unsupported_operation(filter.to_string()))
    }

    /// Number of cached entries, shared and exclusive
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn statistics(&self) -> CacheStatistics {
        let finalizer = self.finalizer.stats();
        let closer = self.closer.stats();
        CacheStatistics {
            entries: self.len(),
            finalizer_tracked: finalizer.tracked,
            finalizer_completed: finalizer.completed,
            finalizer_failed: finalizer.failed,
            pending_closes: closer.pending,
            deferred_closed: closer.closed,
            deferred_close_failures: closer.failed,
            ..self.stats.snapshot()
        }
    }
}
