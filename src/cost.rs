//! Computation-cost-weighted eviction
//!
//! Under pressure it is cheapest to re-derive the entries that were fast to
//! compute, so the policy evicts those first: every value produced by the
//! mapping function records the wall-clock duration of the call as its
//! cost, and purging removes the minimum-cost entry. Explicit inserts
//! record a zero-cost sentinel, which makes manually supplied values the
//! first to go.

use crate::config::{CacheBounds, CacheConfig};
use crate::error::{CacheError, Result};
use crate::manager::{CacheManager, RegistrationToken};
use crate::metrics::{CacheMetrics, CacheStats};
use crate::traits::{Cache, Mapper, PurgeRequest};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Eviction index for the cost-weighted policy: a min-heap over recorded
/// costs paired with a cost→keys lookup. Costs are not required to be
/// unique, so each cost maps to a bucket of keys in recording order.
///
/// `remove_key` empties bucket slots without touching the heap; `pop_min`
/// drains heap entries whose bucket has since disappeared. No cost entry
/// outlives its store entry beyond the scope of one purge or remove call.
struct CostIndex<K> {
    heap: BinaryHeap<Reverse<Duration>>,
    by_cost: HashMap<Duration, VecDeque<K>>,
}

impl<K: Eq + Clone> CostIndex<K> {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            by_cost: HashMap::new(),
        }
    }

    fn record(&mut self, cost: Duration, key: K) {
        self.heap.push(Reverse(cost));
        self.by_cost.entry(cost).or_default().push_back(key);
    }

    /// Pop the key with the minimum recorded cost, skipping heap entries
    /// whose bucket was emptied by an earlier removal.
    fn pop_min(&mut self) -> Option<K> {
        while let Some(Reverse(cost)) = self.heap.pop() {
            if let Some(bucket) = self.by_cost.get_mut(&cost) {
                let key = bucket.pop_front();
                if bucket.is_empty() {
                    self.by_cost.remove(&cost);
                }
                if let Some(key) = key {
                    return Some(key);
                }
            }
        }
        None
    }

    /// Drop every cost entry that points at `key`.
    fn remove_key(&mut self, key: &K) {
        for bucket in self.by_cost.values_mut() {
            bucket.retain(|candidate| candidate != key);
        }
        self.by_cost.retain(|_, bucket| !bucket.is_empty());
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.by_cost.clear();
    }

    fn is_empty(&self) -> bool {
        self.by_cost.is_empty()
    }
}

/// A bounded cache that evicts the cheapest-to-recompute entries first.
///
/// Purging an empty cache is a no-op for this policy; there is no victim to
/// select and the store is left untouched.
pub struct CostWeightedCache<K, V> {
    store: DashMap<K, V>,
    index: Mutex<CostIndex<K>>,
    mapper: RwLock<Option<Mapper<K, V>>>,
    bounds: CacheBounds,
    metrics: CacheMetrics,
    registration: Mutex<Option<RegistrationToken>>,
}

impl<K, V> CostWeightedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    /// Create a standalone cache that is not registered with any manager.
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            store: DashMap::new(),
            index: Mutex::new(CostIndex::new()),
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

    fn make_room(&self) {
        if self.store.len() + 1 > self.bounds.upper_bound() {
            self.purge(self.bounds.purge_step());
        }
    }

    fn insert_with_cost(&self, key: K, value: V, cost: Duration) -> Option<V> {
        if !self.store.contains_key(&key) {
            self.make_room();
        }
        self.index.lock().record(cost, key.clone());
        self.store.insert(key, value)
    }

    /// Compute the value for `key`, timing the mapping function call; the
    /// elapsed wall-clock duration becomes the entry's cost.
    fn compute_and_insert(&self, key: &K, mapper: &Mapper<K, V>) -> V {
        let started = Instant::now();
        let value = mapper(key);
        let cost = started.elapsed();
        self.metrics.record_computation();
        self.insert_with_cost(key.clone(), value.clone(), cost);
        value
    }

    /// One purge step: evict the minimum-cost live entry, if any.
    fn purge_one(&self) {
        let victim = self.index.lock().pop_min();
        if let Some(key) = victim {
            if self.store.remove(&key).is_some() {
                self.metrics.record_eviction();
            }
        }
    }

    fn current_mapper(&self) -> Option<Mapper<K, V>> {
        self.mapper.read().clone()
    }
}

impl<K, V> Cache<K, V> for CostWeightedCache<K, V>
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
        Some(self.compute_and_insert(key, &mapper))
    }

    fn put(&self, key: K) -> Result<V> {
        let mapper = self.current_mapper().ok_or_else(|| {
            CacheError::missing_mapper("put() requires a mapping function; use insert()")
        })?;
        Ok(self.compute_and_insert(&key, &mapper))
    }

    fn insert(&self, key: K, value: V) -> Option<V> {
        // Zero is the "unknown cost" sentinel: values nobody measured are
        // the first eviction candidates.
        self.insert_with_cost(key, value, Duration::ZERO)
    }

    fn put_all(&self, keys: Vec<K>) -> Result<()> {
        for key in keys {
            self.put(key)?;
        }
        Ok(())
    }

    fn insert_all(&self, entries: Vec<(K, V)>) {
        for (key, value) in entries {
            self.insert(key, value);
        }
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.index.lock().remove_key(key);
        self.store.remove(key).map(|(_, value)| value)
    }

    fn poll(&self) -> Option<(K, V)> {
        loop {
            let key = self.index.lock().pop_min()?;
            if let Some(entry) = self.store.remove(&key) {
                self.metrics.record_eviction();
                return Some(entry);
            }
            // Stale cost entry from a duplicate computation; skip it.
        }
    }

    fn purge(&self, n: usize) {
        for _ in 0..n {
            if self.index.lock().is_empty() {
                return;
            }
            self.purge_one();
        }
    }

    fn clear(&self) {
        // Index first, as in the FIFO policy: unindexed store entries are
        // the tolerated direction of drift.
        self.index.lock().clear();
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

impl<K, V> PurgeRequest for CostWeightedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
{
    fn basic_purge_event(&self) {
        debug!(
            step = self.bounds.purge_step(),
            "cost-weighted cache: basic purge"
        );
        self.purge(self.bounds.purge_step());
    }

    fn critical_purge_event(&self) {
        warn!(
            entries = self.store.len(),
            "cost-weighted cache: critical purge"
        );
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn unbounded() -> Arc<CostWeightedCache<String, String>> {
        CostWeightedCache::new(CacheConfig::default())
    }

    #[test]
    fn test_index_pop_min_orders_by_cost() {
        let mut index = CostIndex::new();
        index.record(Duration::from_millis(30), "mid");
        index.record(Duration::from_millis(5), "cheap");
        index.record(Duration::from_millis(90), "dear");

        assert_eq!(index.pop_min(), Some("cheap"));
        assert_eq!(index.pop_min(), Some("mid"));
        assert_eq!(index.pop_min(), Some("dear"));
        assert_eq!(index.pop_min(), None);
    }

    #[test]
    fn test_index_duplicate_costs_share_a_bucket() {
        let mut index = CostIndex::new();
        let cost = Duration::from_millis(10);
        index.record(cost, "first");
        index.record(cost, "second");

        assert_eq!(index.pop_min(), Some("first"));
        assert_eq!(index.pop_min(), Some("second"));
        assert_eq!(index.pop_min(), None);
    }

    #[test]
    fn test_index_remove_key_drops_every_reference() {
        let mut index = CostIndex::new();
        index.record(Duration::from_millis(1), "target");
        index.record(Duration::from_millis(2), "other");
        index.record(Duration::from_millis(3), "target");

        index.remove_key(&"target");
        assert_eq!(index.pop_min(), Some("other"));
        // Heap entries for the removed costs are drained silently.
        assert_eq!(index.pop_min(), None);
        assert!(index.is_empty());
    }

    #[test]
    fn test_basic_call() {
        let cache = unbounded();
        cache.set_mapper_fn(|key: &String| key.trim().to_string());

        cache.put(" a string to be trimmed ".into()).unwrap();
        assert_eq!(
            cache.get(&" a string to be trimmed ".into()),
            Some("a string to be trimmed".to_string())
        );

        cache.set_mapper_fn(|key: &String| key.trim().to_uppercase());
        cache.put(" another ".into()).unwrap();
        assert_eq!(
            cache.get(&" another ".into()),
            Some("ANOTHER".to_string())
        );
    }

    #[test]
    fn test_cheaper_entry_is_evicted_first() {
        let cache = unbounded();
        cache.set_mapper_fn(|key: &String| {
            if key == "slow" {
                thread::sleep(Duration::from_millis(50));
            }
            key.clone()
        });

        cache.put("slow".into()).unwrap();
        cache.put("fast".into()).unwrap();

        assert_eq!(cache.poll().unwrap().0, "fast");
        assert_eq!(cache.poll().unwrap().0, "slow");
        assert_eq!(cache.poll(), None);
    }

    #[test]
    fn test_explicit_insert_is_preferred_victim() {
        let cache = unbounded();
        cache.set_mapper_fn(|key: &String| {
            thread::sleep(Duration::from_millis(20));
            key.clone()
        });

        cache.put("computed".into()).unwrap();
        cache.insert("manual".into(), "value".into());

        assert_eq!(cache.poll().unwrap().0, "manual");
        assert_eq!(cache.poll().unwrap().0, "computed");
    }

    #[test]
    fn test_upper_bound_enforced() {
        let cache: Arc<CostWeightedCache<String, String>> =
            CostWeightedCache::new(CacheConfig::new(1, 10));
        cache.set_mapper_fn(|key: &String| key.clone());

        let keys = (0..=12).map(|n| n.to_string()).collect();
        cache.put_all(keys).unwrap();

        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn test_remove_with_duplicate_costs() {
        let cache = unbounded();
        // Explicit inserts all share the zero-cost bucket.
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        cache.insert("a".into(), "3".into());

        assert_eq!(cache.remove(&"a".into()), Some("3".to_string()));
        assert_eq!(cache.poll(), Some(("b".to_string(), "2".to_string())));
        assert_eq!(cache.poll(), None);
    }

    #[test]
    fn test_purge_on_empty_is_a_noop() {
        let cache = unbounded();
        cache.purge(5);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_clear_then_recompute() {
        let cache = unbounded();
        cache.set_mapper_fn(|key: &String| key.trim().to_string());
        cache
            .put_all((0..=12).map(|n| format!(" {n} ")).collect())
            .unwrap();
        assert_eq!(cache.len(), 13);

        cache.clear();
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());

        assert_eq!(cache.get(&" 3 ".into()), Some("3".to_string()));
        assert_eq!(cache.stats().computations, 14);
    }

    #[test]
    fn test_purge_events() {
        let cache = unbounded();
        cache.set_purge_step(2);
        for n in 0..5 {
            cache.insert(n.to_string(), n.to_string());
        }

        cache.basic_purge_event();
        assert_eq!(cache.len(), 3);

        cache.critical_purge_event();
        assert!(cache.is_empty());
    }
}
