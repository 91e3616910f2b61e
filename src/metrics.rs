//! Per-cache metrics
//!
//! Lock-free counters updated on the hot path, snapshotted on demand.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Internal counter set owned by each cache
#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
}

impl CacheMetrics {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_computation(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize, mean_member_size: u64) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups > 0 {
            hits as f64 / lookups as f64
        } else {
            0.0
        };

        CacheStats {
            entries,
            hits,
            misses,
            hit_rate,
            computations: self.computations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            mean_member_size,
        }
    }
}

/// Point-in-time statistics for a cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of live entries
    pub entries: usize,
    /// Lookup hits
    pub hits: u64,
    /// Lookup misses
    pub misses: u64,
    /// Fraction of lookups that hit
    pub hit_rate: f64,
    /// Values produced by the mapping function
    pub computations: u64,
    /// Entries removed by eviction (purge, poll, or pressure broadcast)
    pub evictions: u64,
    /// Informational mean member size, as reported by the owner
    pub mean_member_size: u64,
}
