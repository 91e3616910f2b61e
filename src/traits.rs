//! Core cache traits
//!
//! [`Cache`] is the contract both eviction policies implement; it is
//! object-safe so callers can hold `Box<dyn Cache<K, V>>` and swap policies
//! behind one type. [`PurgeRequest`] is the narrow capability the pressure
//! monitor holds on every registered cache.

use crate::error::Result;
use crate::metrics::CacheStats;
use std::hash::Hash;
use std::sync::Arc;

/// Mapping function a cache uses to compute values from keys.
///
/// Panics raised inside the function propagate unmodified to the caller of
/// `get`/`put`; the cache records no entry in that case.
pub type Mapper<K, V> = Arc<dyn Fn(&K) -> V + Send + Sync>;

/// Purge capability invoked by the pressure monitor.
///
/// Only [`crate::manager::CacheManager`] calls these; application code
/// drives eviction through [`Cache::purge`] and [`Cache::poll`].
pub trait PurgeRequest: Send + Sync {
    /// Respond to elevated memory pressure with one lightweight purge cycle
    fn basic_purge_event(&self);

    /// Respond to critical memory pressure by clearing the cache entirely
    fn critical_purge_event(&self);
}

/// A size-bounded key-value cache with an eviction policy.
///
/// Before an insert would push the live-entry count past the upper bound,
/// the cache purges `purge_step` victims and then inserts; under concurrent
/// load the bound is an eventual guarantee rather than an instantaneous
/// limit.
pub trait Cache<K, V>: PurgeRequest
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    /// Look up a key.
    ///
    /// On a miss with a mapping function configured, the value is computed,
    /// inserted through the bound-enforcing path, and returned. On a miss
    /// without one, returns `None`.
    fn get(&self, key: &K) -> Option<V>;

    /// Compute and insert the value for `key` via the mapping function.
    ///
    /// Fails with [`crate::error::CacheError::MissingMapper`] when no
    /// mapping function is configured.
    fn put(&self, key: K) -> Result<V>;

    /// Insert an explicit value, bypassing computation.
    ///
    /// Returns the previous value, if any. Cost-weighted caches record a
    /// zero-cost sentinel for explicit inserts, making them preferred
    /// eviction victims.
    fn insert(&self, key: K, value: V) -> Option<V>;

    /// Compute and insert values for every key. Bound enforcement applies
    /// per element, not after the batch.
    fn put_all(&self, keys: Vec<K>) -> Result<()>;

    /// Insert explicit entries. Bound enforcement applies per element.
    fn insert_all(&self, entries: Vec<(K, V)>);

    /// Remove a key from the store and every index reference to it.
    fn remove(&self, key: &K) -> Option<V>;

    /// Remove and return the entry the eviction policy selects as the next
    /// victim.
    fn poll(&self) -> Option<(K, V)>;

    /// Evict up to `n` victims in policy order.
    ///
    /// Each index pop counts as one step whether or not it still refers to
    /// a live entry. See the policy docs for the empty-cache behavior.
    fn purge(&self, n: usize);

    /// Remove every entry from the store and the eviction index.
    fn clear(&self);

    /// Number of live entries
    fn len(&self) -> usize;

    /// Whether the cache holds no entries
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` maps to a live entry
    fn contains_key(&self, key: &K) -> bool;

    /// Whether any live entry holds `value`
    fn contains_value(&self, value: &V) -> bool;

    /// Snapshot of the live keys
    fn keys(&self) -> Vec<K>;

    /// Snapshot of the live values
    fn values(&self) -> Vec<V>;

    /// Snapshot of the live entries
    fn entries(&self) -> Vec<(K, V)>;

    /// Set or replace the mapping function
    fn set_mapper(&self, mapper: Mapper<K, V>);

    /// Current upper bound on live entries
    fn upper_bound(&self) -> usize;

    /// Adjust the upper bound. Takes effect on subsequent inserts.
    fn set_upper_bound(&self, bound: usize);

    /// Current purge step
    fn purge_step(&self) -> usize;

    /// Adjust the purge step
    fn set_purge_step(&self, step: usize);

    /// Informational mean member size, as last reported via
    /// [`Cache::set_mean_member_size`]
    fn mean_member_size(&self) -> u64;

    /// Record an informational mean member size for this cache
    fn set_mean_member_size(&self, size: u64);

    /// Point-in-time statistics
    fn stats(&self) -> CacheStats;

    /// Deregister from the pressure monitor. Idempotent; the cache remains
    /// usable afterwards but no longer receives purge broadcasts.
    fn close(&self);
}
