//! Shared cache of storage-backend client handles
//!
//! ## Key Components
//!
//! - **`resource_cache`**: keyed lookup, creation, rotation and eviction of handles.
//! - **`finalizer`**: closes handles once every holder has dropped them.
//! - **`closer`**: closes evicted handles after a grace window.
//! - **`config`**: cache configuration with file and environment precedence.
//! - **`context`**: owns the background workers shared by caches.

pub mod backend;
pub mod clock;
pub mod closer;
pub mod config;
pub mod context;
pub mod finalizer;
pub mod handle;
pub mod key;
pub mod resource_cache;
pub mod statistics;

pub use backend::{BackendConfig, BackendFactory, BackendResource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use closer::{CloserStats, DeferredCloser, PendingClose};
pub use config::{CacheConfig, CacheConfigBuilder, CacheConfigLoader, ConfigSource, LoadedConfig};
pub use context::CacheContext;
pub use finalizer::{FinalizationTracker, FinalizerStats, Registration};
pub use handle::{Closeable, Handle, HandleId, ResourceSlot};
pub use key::{credential_tokens, CacheKey, IdentityKey};
pub use resource_cache::{CloseFilter, ResourceCache};
pub use statistics::CacheStatistics;

pub use fspool_core::{Error, Result};
