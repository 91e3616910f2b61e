//! Insertion-order (FIFO) eviction
//!
//! The store is a sharded concurrent map; the eviction index is a queue of
//! keys in insertion order guarded by its own mutex, never held across a
//! store operation. A duplicate insert of an existing key appends a second
//! queue reference; eviction skips references whose key is no longer live
//! instead of repairing the queue eagerly.

use crate::config::{CacheBounds, CacheConfig};
use crate::error::{CacheError, Result};
use crate::manager::{CacheManager, RegistrationToken};
use crate::metrics::{CacheMetrics, CacheStats};
use crate::traits::{Cache, Mapper, PurgeRequest};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, warn};

/// A bounded cache that evicts entries in insertion order.
///
/// Purging an empty cache degenerates to [`FifoCache::clear`]: a purge step
/// that finds the queue empty clears the store as well, so the two
/// structures can never drift apart through repeated purging.
pub struct FifoCache<K, V> {
    store: DashMap<K, V>,
    queue: Mutex<VecDeque<K>>,
    mapper: RwLock<Option<Mapper<K, V>>>,
    bounds: CacheBounds,
    metrics: CacheMetrics,
    registration: Mutex<Option<RegistrationToken>>,
}

impl<K, V> FifoCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    /// Create a standalone cache that is not registered with any manager.
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            store: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            mapper: RwLock::new(None),
            bounds: CacheBounds::new(&config),
            metrics: CacheMetrics::default(),
            registration: Mutex::new(None),
        })
    }

    /// Create a cache and register it with `manager` for purge broadcasts.
    pub fn managed(config: CacheConfig, manager: &Arc<CacheManager>) -> Arc<Self> {
        let cache = Self::new(config);
        let handle = Arc::downgrade(&cache) as std::sync::Weak<dyn PurgeRequest>;
        *cache.registration.lock() = Some(RegistrationToken::acquire(manager, handle));
        cache
    }

    /// Set the mapping function from a plain closure.
    pub fn set_mapper_fn(&self, mapper: impl Fn(&K) -> V + Send + Sync + 'static) {
        self.set_mapper(Arc::new(mapper));
    }

    /// Purge `purge_step` victims when an insert would exceed the bound.
    fn make_room(&self) {
        if self.store.len() + 1 > self.bounds.upper_bound() {
            self.purge(self.bounds.purge_step());
        }
    }

    fn insert_bounded(&self, key: K, value: V) -> Option<V> {
        if !self.store.contains_key(&key) {
            self.make_room();
        }
        self.queue.lock().push_back(key.clone());
        self.store.insert(key, value)
    }

    /// One purge step: pop the oldest queue reference and remove its entry
    /// if the key is still live. An empty queue degenerates to a full clear.
    fn purge_one(&self) {
        let victim = self.queue.lock().pop_front();
        match victim {
            Some(key) => {
                if self.store.remove(&key).is_some() {
                    self.metrics.record_eviction();
                }
            }
            None => self.clear(),
        }
    }

    fn current_mapper(&self) -> Option<Mapper<K, V>> {
        self.mapper.read().clone()
    }
}

impl<K, V> Cache<K, V> for FifoCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.store.get(key) {
            self.metrics.record_hit();
            return Some(entry.value().clone());
        }
        self.metrics.record_miss();

        let mapper = self.current_mapper()?;
        let value = mapper(key);
        self.metrics.record_computation();
        self.insert_bounded(key.clone(), value.clone());
        Some(value)
    }

    fn put(&self, key: K) -> Result<V> {
        let mapper = self.current_mapper().ok_or_else(|| {
            CacheError::missing_mapper("put() requires a mapping function; use insert()")
        })?;
        let value = mapper(&key);
        self.metrics.record_computation();
        self.insert_bounded(key, value.clone());
        Ok(value)
    }

    fn insert(&self, key: K, value: V) -> Option<V> {
        self.insert_bounded(key, value)
    }

    fn put_all(&self, keys: Vec<K>) -> Result<()> {
        for key in keys {
            self.put(key)?;
        }
        Ok(())
    }

    fn insert_all(&self, entries: Vec<(K, V)>) {
        for (key, value) in entries {
            self.insert_bounded(key, value);
        }
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.queue.lock().retain(|queued| queued != key);
        self.store.remove(key).map(|(_, value)| value)
    }

    fn poll(&self) -> Option<(K, V)> {
        loop {
            let key = self.queue.lock().pop_front()?;
            if let Some(entry) = self.store.remove(&key) {
                self.metrics.record_eviction();
                return Some(entry);
            }
            // Stale reference from a duplicate insert or a remove; skip it.
        }
    }

    fn purge(&self, n: usize) {
        for _ in 0..n {
            self.purge_one();
        }
    }

    fn clear(&self) {
        // Index first: a store entry without an index reference is the
        // tolerated direction of drift, the reverse is not.
        self.queue.lock().clear();
        self.store.clear();
    }

    fn len(&self) -> usize {
        self.store.len()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.store.contains_key(key)
    }

    fn contains_value(&self, value: &V) -> bool {
        self.store.iter().any(|entry| entry.value() == value)
    }

    fn keys(&self) -> Vec<K> {
        self.store.iter().map(|entry| entry.key().clone()).collect()
    }

    fn values(&self) -> Vec<V> {
        self.store
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn entries(&self) -> Vec<(K, V)> {
        self.store
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn set_mapper(&self, mapper: Mapper<K, V>) {
        *self.mapper.write() = Some(mapper);
    }

    fn upper_bound(&self) -> usize {
        self.bounds.upper_bound()
    }

    fn set_upper_bound(&self, bound: usize) {
        self.bounds.set_upper_bound(bound);
    }

    fn purge_step(&self) -> usize {
        self.bounds.purge_step()
    }

    fn set_purge_step(&self, step: usize) {
        self.bounds.set_purge_step(step);
    }

    fn mean_member_size(&self) -> u64 {
        self.bounds.mean_member_size()
    }

    fn set_mean_member_size(&self, size: u64) {
        self.bounds.set_mean_member_size(size);
    }

    fn stats(&self) -> CacheStats {
        self.metrics
            .snapshot(self.store.len(), self.bounds.mean_member_size())
    }

    fn close(&self) {
        if let Some(token) = self.registration.lock().take() {
            token.release();
        }
    }
}

impl<K, V> PurgeRequest for FifoCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    fn basic_purge_event(&self) {
        debug!(step = self.bounds.purge_step(), "fifo cache: basic purge");
        self.purge(self.bounds.purge_step());
    }

    fn critical_purge_event(&self) {
        warn!(entries = self.store.len(), "fifo cache: critical purge");
        self.clear();
    }
}
