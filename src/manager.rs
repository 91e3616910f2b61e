//! Process-wide memory-pressure monitor
//!
//! A `CacheManager` owns a registry of weak purge handles and a background
//! thread that samples memory pressure on a fixed period. When pressure
//! crosses the soft threshold every registered cache receives one basic
//! purge; when the strictly-free figure also crosses the hard threshold the
//! broadcast escalates to a critical purge and each cache clears itself.
//!
//! The manager is an explicit value: construct one, pass it to the
//! `managed` cache constructors, shut it down when done. A lazy process
//! default is available through [`CacheManager::global`] for callers that
//! want exactly one monitor without threading it everywhere.

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::memory::{MemoryInfo, MemorySource, ProcMemorySource};
use crate::traits::PurgeRequest;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static GLOBAL_MANAGER: Lazy<Arc<CacheManager>> =
    Lazy::new(|| CacheManager::new(ManagerConfig::default()));

/// One registry slot: a cache id and the weak purge capability.
struct Registration {
    id: u64,
    handle: Weak<dyn PurgeRequest>,
}

/// Shutdown flag the sampler thread waits on between ticks, so shutdown
/// interrupts a sleep instead of waiting out the period.
struct ShutdownSignal {
    flag: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn raise(&self) {
        *self.flag.lock() = true;
        self.condvar.notify_all();
    }

    /// Wait up to `timeout`; returns true when shutdown was requested.
    fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock();
        while !*flag {
            if self.condvar.wait_until(&mut flag, deadline).timed_out() {
                break;
            }
        }
        *flag
    }
}

/// Handle a cache keeps so `close()` can deregister it.
pub(crate) struct RegistrationToken {
    manager: Weak<CacheManager>,
    id: u64,
}

impl RegistrationToken {
    pub(crate) fn acquire(manager: &Arc<CacheManager>, handle: Weak<dyn PurgeRequest>) -> Self {
        let id = manager.register(handle);
        Self {
            manager: Arc::downgrade(manager),
            id,
        }
    }

    pub(crate) fn release(self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.deregister(self.id);
        }
    }
}

/// Registry of live caches plus the background pressure sampler.
pub struct CacheManager {
    registry: RwLock<Vec<Registration>>,
    memory: Box<dyn MemorySource>,
    config: ManagerConfig,
    next_id: AtomicU64,
    signal: Arc<ShutdownSignal>,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl CacheManager {
    /// Create a manager that reads live process memory figures and start
    /// its sampling thread.
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        Self::with_memory_source(config, Box::new(ProcMemorySource::new()))
    }

    /// Create a manager with an explicit memory source. Tests inject a mock
    /// here and drive [`CacheManager::run_tick`] directly.
    pub fn with_memory_source(config: ManagerConfig, memory: Box<dyn MemorySource>) -> Arc<Self> {
        let config = config.normalized();
        let manager = Arc::new(Self {
            registry: RwLock::new(Vec::new()),
            memory,
            config,
            next_id: AtomicU64::new(0),
            signal: Arc::new(ShutdownSignal::new()),
            sampler: Mutex::new(None),
        });
        Self::spawn_sampler(&manager);
        manager
    }

    /// The process-wide default manager, created lazily on first use.
    pub fn global() -> &'static Arc<CacheManager> {
        &GLOBAL_MANAGER
    }

    fn spawn_sampler(manager: &Arc<Self>) {
        let weak = Arc::downgrade(manager);
        let signal = Arc::clone(&manager.signal);
        let initial_delay = manager.config.initial_delay();
        let period = manager.config.sample_period();

        let handle = thread::Builder::new()
            .name("purgecache-monitor".into())
            .spawn(move || {
                if signal.wait_for(initial_delay) {
                    return;
                }
                loop {
                    // Hold the manager only for the duration of one tick so
                    // an abandoned manager can unwind.
                    match weak.upgrade() {
                        Some(manager) => manager.run_tick(),
                        None => return,
                    }
                    if signal.wait_for(period) {
                        return;
                    }
                }
            })
            .expect("failed to spawn pressure monitor thread");

        *manager.sampler.lock() = Some(handle);
        info!(
            period_ms = manager.config.sample_period_ms,
            soft = manager.config.soft_pressure,
            hard = manager.config.hard_pressure,
            "pressure monitor started"
        );
    }

    /// Register a cache for purge broadcasts; returns its registry id.
    pub fn register(&self, handle: Weak<dyn PurgeRequest>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.write().push(Registration { id, handle });
        debug!(id, "cache registered");
        id
    }

    /// Remove a cache from the registry. Unknown ids are ignored.
    pub fn deregister(&self, id: u64) {
        self.registry.write().retain(|reg| reg.id != id);
        debug!(id, "cache deregistered");
    }

    /// Number of currently registered caches
    pub fn cache_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Current memory snapshot
    pub fn memory_info(&self) -> Result<MemoryInfo> {
        self.memory.sample()
    }

    /// Current memory pressure (`1 - available/total`)
    pub fn memory_pressure(&self) -> Result<f64> {
        Ok(self.memory.sample()?.pressure())
    }

    /// Bytes of memory currently in use
    pub fn used_memory(&self) -> Result<u64> {
        Ok(self.memory.sample()?.used())
    }

    /// Bytes of strictly-free memory
    pub fn free_memory(&self) -> Result<u64> {
        Ok(self.memory.sample()?.free)
    }

    /// Run one sampling tick: prune dead registrations, read the memory
    /// figures, and broadcast a purge when pressure warrants one.
    ///
    /// The background thread calls this on its period; tests call it
    /// directly for deterministic coverage.
    pub fn run_tick(&self) {
        self.prune_dead();

        let info = match self.memory.sample() {
            Ok(info) => info,
            Err(err) => {
                warn!("skipping pressure sample: {err}");
                return;
            }
        };

        let pressure = info.pressure();
        debug!(pressure, "pressure sample");
        if pressure <= self.config.soft_pressure {
            return;
        }

        // Snapshot the registry so caches can register or deregister while
        // the broadcast is in flight.
        let handles: Vec<Weak<dyn PurgeRequest>> = self
            .registry
            .read()
            .iter()
            .map(|reg| Weak::clone(&reg.handle))
            .collect();

        if info.strict_pressure() > self.config.hard_pressure {
            warn!(
                pressure,
                strict = info.strict_pressure(),
                caches = handles.len(),
                "critical memory pressure, clearing all caches"
            );
            for handle in &handles {
                if let Some(cache) = handle.upgrade() {
                    cache.critical_purge_event();
                }
            }
        } else {
            debug!(
                pressure,
                caches = handles.len(),
                "memory pressure above soft threshold, broadcasting purge"
            );
            for handle in &handles {
                if let Some(cache) = handle.upgrade() {
                    cache.basic_purge_event();
                }
            }
        }
    }

    fn prune_dead(&self) {
        self.registry
            .write()
            .retain(|reg| reg.handle.strong_count() > 0);
    }

    /// Stop the sampling thread. Idempotent; also invoked on drop.
    pub fn shutdown(&self) {
        self.signal.raise();
        if let Some(handle) = self.sampler.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        info!("pressure monitor stopped");
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("caches", &self.cache_count())
            .field("soft_pressure", &self.config.soft_pressure)
            .field("hard_pressure", &self.config.hard_pressure)
            .field("sample_period_ms", &self.config.sample_period_ms)
            .finish()
    }
}
