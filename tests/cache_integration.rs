//! End-to-end tests exercising the caches and the pressure monitor through
//! the public API only.

use parking_lot::Mutex;
use purgecache::{
    Cache, CacheConfig, CacheManager, CostWeightedCache, FifoCache, ManagerConfig, MemoryInfo,
    MemorySource, Result,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Memory source the test adjusts between ticks.
struct SharedMemorySource {
    info: Arc<Mutex<MemoryInfo>>,
}

impl MemorySource for SharedMemorySource {
    fn sample(&self) -> Result<MemoryInfo> {
        Ok(*self.info.lock())
    }
}

fn quiet_manager(info: Arc<Mutex<MemoryInfo>>) -> Arc<CacheManager> {
    let config = ManagerConfig {
        sample_period_ms: 3_600_000,
        initial_delay_ms: 3_600_000,
        ..ManagerConfig::default()
    };
    CacheManager::with_memory_source(config, Box::new(SharedMemorySource { info }))
}

fn calm() -> MemoryInfo {
    MemoryInfo {
        total: 1000,
        free: 800,
        available: 900,
    }
}

fn above_soft() -> MemoryInfo {
    MemoryInfo {
        total: 1000,
        free: 150,
        available: 200,
    }
}

fn above_hard() -> MemoryInfo {
    MemoryInfo {
        total: 1000,
        free: 50,
        available: 150,
    }
}

#[test]
fn fifo_bound_holds_after_bulk_insert() {
    let cache: Arc<FifoCache<String, i64>> = FifoCache::new(CacheConfig::new(1, 10));
    cache.set_mapper_fn(|key: &String| key.parse().unwrap());

    cache
        .put_all((0..=12).map(|n| n.to_string()).collect())
        .unwrap();

    assert_eq!(cache.len(), 10);
}

#[test]
fn fifo_eviction_follows_insertion_order_modulo_removals() {
    let cache: Arc<FifoCache<&str, u32>> = FifoCache::new(CacheConfig::default());
    for (i, key) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
        cache.insert(key, i as u32);
    }
    cache.remove(&"c");

    let order: Vec<&str> = std::iter::from_fn(|| cache.poll().map(|(k, _)| k)).collect();
    assert_eq!(order, vec!["a", "b", "d", "e"]);
}

#[test]
fn cost_weighted_evicts_cheapest_first() {
    let cache: Arc<CostWeightedCache<String, String>> =
        CostWeightedCache::new(CacheConfig::default());
    cache.set_mapper_fn(|key: &String| {
        let delay = match key.as_str() {
            "expensive" => 60,
            "medium" => 25,
            _ => 0,
        };
        thread::sleep(Duration::from_millis(delay));
        key.to_uppercase()
    });

    cache.put("expensive".into()).unwrap();
    cache.put("cheap".into()).unwrap();
    cache.put("medium".into()).unwrap();

    assert_eq!(cache.poll().unwrap().0, "cheap");
    assert_eq!(cache.poll().unwrap().0, "medium");
    assert_eq!(cache.poll().unwrap().0, "expensive");
}

#[test]
fn mapper_hot_swap_changes_subsequent_computations() {
    let cache: Arc<FifoCache<String, String>> = FifoCache::new(CacheConfig::default());

    cache.set_mapper_fn(|key: &String| key.to_uppercase());
    cache.put("rand".into()).unwrap();
    cache.set_mapper_fn(|key: &String| key.to_lowercase());
    cache.put("OTHER".into()).unwrap();

    assert_eq!(cache.get(&"rand".into()), Some("RAND".to_string()));
    assert_eq!(cache.get(&"OTHER".into()), Some("other".to_string()));
}

#[test]
fn clear_empties_and_lookups_recompute() {
    let cache: Arc<CostWeightedCache<String, String>> =
        CostWeightedCache::new(CacheConfig::default());
    cache.set_mapper_fn(|key: &String| key.trim().to_string());
    cache
        .put_all((0..=12).map(|n| format!(" {n} ")).collect())
        .unwrap();
    assert_eq!(cache.len(), 13);

    cache.clear();
    assert_eq!(cache.len(), 0);
    assert!(cache.is_empty());

    assert_eq!(cache.get(&" 7 ".into()), Some("7".to_string()));
}

#[test]
fn policies_are_interchangeable_behind_the_trait() {
    let caches: Vec<Arc<dyn Cache<String, String>>> = vec![
        FifoCache::new(CacheConfig::new(2, 100)) as Arc<dyn Cache<String, String>>,
        CostWeightedCache::new(CacheConfig::new(2, 100)) as Arc<dyn Cache<String, String>>,
    ];

    for cache in &caches {
        cache.set_mapper(Arc::new(|key: &String| key.to_uppercase()));
        assert_eq!(cache.put("key".into()).unwrap(), "KEY");
        assert_eq!(cache.get(&"key".into()), Some("KEY".to_string()));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}

#[test]
fn manager_soft_tick_purges_each_cache_once() {
    let info = Arc::new(Mutex::new(calm()));
    let manager = quiet_manager(Arc::clone(&info));

    let fifo = FifoCache::managed(CacheConfig::new(1, 100), &manager);
    let cost = CostWeightedCache::managed(CacheConfig::new(1, 100), &manager);
    for n in 0..4 {
        fifo.insert(n.to_string(), n);
        cost.insert(n.to_string(), n);
    }
    assert_eq!(manager.cache_count(), 2);

    // Calm tick: nothing happens.
    manager.run_tick();
    assert_eq!(fifo.len(), 4);
    assert_eq!(cost.len(), 4);

    // One soft tick: each cache loses exactly one purge step of entries.
    *info.lock() = above_soft();
    manager.run_tick();
    assert_eq!(fifo.len(), 3);
    assert_eq!(cost.len(), 3);

    fifo.close();
    cost.close();
    manager.shutdown();
}

#[test]
fn manager_hard_tick_clears_every_cache() {
    let info = Arc::new(Mutex::new(above_hard()));
    let manager = quiet_manager(Arc::clone(&info));

    let fifo = FifoCache::managed(CacheConfig::new(1, 100), &manager);
    let cost = CostWeightedCache::managed(CacheConfig::new(1, 100), &manager);
    for n in 0..4 {
        fifo.insert(n.to_string(), n);
        cost.insert(n.to_string(), n);
    }

    manager.run_tick();
    assert_eq!(fifo.len(), 0);
    assert_eq!(cost.len(), 0);

    fifo.close();
    cost.close();
    manager.shutdown();
}

#[test]
fn close_deregisters_from_the_manager() {
    let info = Arc::new(Mutex::new(calm()));
    let manager = quiet_manager(info);

    let fifo = FifoCache::<String, usize>::managed(CacheConfig::default(), &manager);
    let cost = CostWeightedCache::<String, usize>::managed(CacheConfig::default(), &manager);
    assert_eq!(manager.cache_count(), 2);

    fifo.close();
    assert_eq!(manager.cache_count(), 1);
    fifo.close(); // idempotent
    assert_eq!(manager.cache_count(), 1);

    cost.close();
    assert_eq!(manager.cache_count(), 0);
    manager.shutdown();
}

#[test]
fn dropped_cache_is_pruned_on_the_next_tick() {
    let info = Arc::new(Mutex::new(calm()));
    let manager = quiet_manager(info);

    let cache = FifoCache::<String, usize>::managed(CacheConfig::default(), &manager);
    assert_eq!(manager.cache_count(), 1);

    drop(cache);
    manager.run_tick();
    assert_eq!(manager.cache_count(), 0);
    manager.shutdown();
}

#[test]
fn concurrent_inserts_keep_the_bound_eventual() {
    const BOUND: usize = 100;
    const THREADS: usize = 4;
    const PER_THREAD: usize = 500;

    let cache: Arc<FifoCache<String, usize>> = FifoCache::new(CacheConfig::new(10, BOUND));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for n in 0..PER_THREAD {
                    cache.insert(format!("{t}:{n}"), n);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Racing inserts may overshoot transiently, but never unboundedly: the
    // worst case is one in-flight insert per thread past the bound.
    assert!(cache.len() <= BOUND + THREADS);

    // Once traffic stops, purging the overshoot restores the bound.
    cache.purge(cache.len().saturating_sub(BOUND));
    assert!(cache.len() <= BOUND);
}
