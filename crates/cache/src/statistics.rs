//! Cache statistics tracking and reporting

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of cache activity
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub creations: u64,
    pub creation_failures: u64,
    pub rotations: u64,
    pub evictions: u64,
    pub capacity_rejections: u64,
    pub entries: usize,
    pub finalizer_tracked: usize,
    pub finalizer_completed: u64,
    pub finalizer_failed: u64,
    pub pending_closes: usize,
    pub deferred_closed: u64,
    pub deferred_close_failures: u64,
}

impl CacheStatistics {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Shared lookups served, including ones that had to create
    pub fn total_lookups(&self) -> u64 {
        self.hits + self.misses + self.rotations
    }
}

/// Lock-free counters updated on the lookup path
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    creations: AtomicU64,
    creation_failures: AtomicU64,
    rotations: AtomicU64,
    evictions: AtomicU64,
    capacity_rejections: AtomicU64,
}

impl StatsRecorder {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_creation(&self) {
        self.creations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_creation_failure(&self) {
        self.creation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capacity_rejection(&self) {
        self.capacity_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters into a snapshot; the caller fills in gauges
    pub fn snapshot(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            creations: self.creations.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            ..CacheStatistics::default()
        }
    }
}
