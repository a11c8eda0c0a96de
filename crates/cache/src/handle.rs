//! Shared handles around backend resources
//!
//! A [`Handle`] is the wrapper callers hold. Every clone shares one
//! [`ResourceSlot`], which owns the resource and a one-shot close flag.
//! The slot is what the deferred closer and the finalizer act on; neither
//! holds the wrapper, so dropping the last `Handle` is observable.

use crate::backend::BackendResource;
use crate::finalizer::Registration;
use fspool_core::{Error, Result};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a cached resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something that can be closed at most once, from any thread
pub trait Closeable: Send + Sync {
    fn id(&self) -> HandleId;

    /// Close the underlying resource unless it already was.
    ///
    /// Returns `Ok(true)` when this call performed the close and `Ok(false)`
    /// when an earlier call already did.
    fn close_once(&self) -> Result<bool>;

    fn is_closed(&self) -> bool;

    fn describe(&self) -> String;
}

/// Owner of a backend resource plus its close guard
pub struct ResourceSlot<R> {
    id: HandleId,
    target: String,
    resource: R,
    closed: AtomicBool,
}

impl<R: BackendResource> ResourceSlot<R> {
    pub fn new(target: impl Into<String>, resource: R) -> Self {
        Self {
            id: HandleId::next(),
            target: target.into(),
            resource,
            closed: AtomicBool::new(false),
        }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl<R: BackendResource> Closeable for ResourceSlot<R> {
    fn id(&self) -> HandleId {
        self.id
    }

    fn close_once(&self) -> Result<bool> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }

        tracing::debug!("Closing backend resource {}", self.describe());
        self.resource
            .close()
            .map(|()| true)
            .map_err(|e| Error::backend_close(self.describe(), e))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.id, self.target)
    }
}

struct HandleInner<R> {
    slot: Arc<ResourceSlot<R>>,
    // Dropped together with the last wrapper; notifies the finalizer.
    _registration: Registration,
}

/// Cloneable wrapper handed out by the cache
///
/// All clones refer to the same resource. Once every clone (including the
/// cache's own) is gone, the finalizer closes the resource.
pub struct Handle<R> {
    inner: Arc<HandleInner<R>>,
}

impl<R: BackendResource> Handle<R> {
    pub(crate) fn new(slot: Arc<ResourceSlot<R>>, registration: Registration) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                slot,
                _registration: registration,
            }),
        }
    }

    pub fn id(&self) -> HandleId {
        self.inner.slot.id
    }

    pub fn target(&self) -> &str {
        self.inner.slot.target()
    }

    pub fn resource(&self) -> &R {
        self.inner.slot.resource()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.slot.is_closed()
    }

    /// Whether both handles wrap the same resource
    pub fn same_resource(&self, other: &Handle<R>) -> bool {
        Arc::ptr_eq(&self.inner.slot, &other.inner.slot)
    }

    /// Close the resource now; later closes from any path are no-ops
    ///
    /// Callers go through `ResourceCache::close` so the entry is evicted too.
    pub(crate) fn close(&self) -> Result<bool> {
        self.inner.slot.close_once()
    }

    pub(crate) fn closeable(&self) -> Arc<dyn Closeable> {
        // Clone the concrete Arc first, then unsize it to the trait object.
        let slot: Arc<ResourceSlot<R>> = Arc::clone(&self.inner.slot);
        slot
    }
}

impl<R> Clone for Handle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: BackendResource> Deref for Handle<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource()
    }
}

impl<R: BackendResource> fmt::Debug for Handle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id())
            .field("target", &self.target())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fspool_core::BoxError;

    struct CountingResource {
        closes: AtomicU64,
        fail: bool,
    }

    impl BackendResource for CountingResource {
        fn close(&self) -> std::result::Result<(), BoxError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("connection reset".into());
            }
            Ok(())
        }
    }

    fn slot(fail: bool) -> ResourceSlot<CountingResource> {
        ResourceSlot::new(
            "hdfs://nn1",
            CountingResource {
                closes: AtomicU64::new(0),
                fail,
            },
        )
    }

    #[test]
    fn test_close_once_is_idempotent() {
        let slot = slot(false);
        assert!(slot.close_once().unwrap());
        assert!(!slot.close_once().unwrap());
        assert!(slot.is_closed());
        assert_eq!(slot.resource().closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_close_still_terminal() {
        let slot = slot(true);
        let err = slot.close_once().unwrap_err();
        assert!(matches!(err, Error::BackendClose { .. }));
        assert!(slot.is_closed());
        assert!(!slot.close_once().unwrap());
        assert_eq!(slot.resource().closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(slot(false).id(), slot(false).id());
    }
}
