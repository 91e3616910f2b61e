//! # purgecache
//!
//! Size-bounded, pressure-aware in-process caching.
//!
//! A [`Cache`] is a concurrent key-value store that can compute its own
//! values from a mapping function and keeps its live-entry count under a
//! configurable bound by evicting victims in policy order:
//!
//! - [`FifoCache`] evicts in insertion order.
//! - [`CostWeightedCache`] evicts the entries that were cheapest to
//!   compute, minimizing the total cost of future recomputation.
//!
//! A [`CacheManager`] samples process memory pressure on a background
//! thread and broadcasts purge requests to every registered cache: one
//! lightweight purge step above the soft threshold, a full clear above the
//! hard threshold.
//!
//! ```no_run
//! use purgecache::{Cache, CacheConfig, CacheManager, FifoCache, ManagerConfig};
//!
//! let manager = CacheManager::new(ManagerConfig::default());
//! let cache = FifoCache::managed(CacheConfig::new(50, 10_000), &manager);
//! cache.set_mapper_fn(|key: &String| key.to_uppercase());
//!
//! assert_eq!(cache.get(&"rand".into()), Some("RAND".into()));
//!
//! cache.close();
//! manager.shutdown();
//! ```

pub mod config;
pub mod cost;
pub mod error;
pub mod fifo;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod traits;

pub use config::{CacheConfig, ManagerConfig};
pub use cost::CostWeightedCache;
pub use error::{CacheError, Result};
pub use fifo::FifoCache;
pub use manager::CacheManager;
pub use memory::{MemoryInfo, MemorySource, ProcMemorySource};
pub use metrics::CacheStats;
pub use traits::{Cache, Mapper, PurgeRequest};
