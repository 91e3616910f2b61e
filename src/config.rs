//! Configuration for caches and the pressure monitor
//!
//! Plain serde structs with defaults that match the behavior of an
//! unconfigured cache: a generous upper bound, a purge step of 50, and a
//! monitor that samples every five seconds against a 0.7 soft threshold.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Default number of victims evicted per purge cycle.
pub const DEFAULT_PURGE_STEP: usize = 50;
/// Default maximum number of live entries before eviction triggers.
pub const DEFAULT_UPPER_BOUND: usize = 1_000_000;
/// Default soft memory-pressure threshold.
pub const DEFAULT_SOFT_PRESSURE: f64 = 0.7;
/// Default hard (critical) memory-pressure threshold.
pub const DEFAULT_HARD_PRESSURE: f64 = 0.9;
/// Default sampling period of the pressure monitor, in milliseconds.
pub const DEFAULT_SAMPLE_PERIOD_MS: u64 = 5_000;

/// Per-cache bound settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum tolerated live-entry count before an insert triggers eviction
    pub upper_bound: usize,
    /// Number of victims removed per purge cycle
    pub purge_step: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            upper_bound: DEFAULT_UPPER_BOUND,
            purge_step: DEFAULT_PURGE_STEP,
        }
    }
}

impl CacheConfig {
    /// Create a config with an explicit purge step and upper bound
    pub fn new(purge_step: usize, upper_bound: usize) -> Self {
        Self {
            upper_bound,
            purge_step,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.upper_bound == 0 {
            return Err(CacheError::memory("upper_bound must be at least 1"));
        }
        if self.purge_step == 0 {
            return Err(CacheError::memory("purge_step must be at least 1"));
        }
        Ok(())
    }
}

/// Pressure monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Pressure above which registered caches receive a basic purge
    pub soft_pressure: f64,
    /// Strict pressure above which registered caches are fully cleared
    pub hard_pressure: f64,
    /// Sampling period in milliseconds
    pub sample_period_ms: u64,
    /// Delay before the first sample in milliseconds
    pub initial_delay_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            soft_pressure: DEFAULT_SOFT_PRESSURE,
            hard_pressure: DEFAULT_HARD_PRESSURE,
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            initial_delay_ms: DEFAULT_SAMPLE_PERIOD_MS,
        }
    }
}

impl ManagerConfig {
    /// Sampling period as a [`Duration`]
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    /// Initial delay as a [`Duration`]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Clamp thresholds into the open unit interval, preserving soft <= hard.
    pub(crate) fn normalized(mut self) -> Self {
        self.soft_pressure = self.soft_pressure.clamp(0.01, 0.99);
        self.hard_pressure = self.hard_pressure.clamp(self.soft_pressure, 0.99);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.soft_pressure) || self.soft_pressure <= 0.0 {
            return Err(CacheError::memory(format!(
                "soft_pressure must be in (0, 1), got {}",
                self.soft_pressure
            )));
        }
        if self.hard_pressure < self.soft_pressure || self.hard_pressure >= 1.0 {
            return Err(CacheError::memory(format!(
                "hard_pressure must be in [soft_pressure, 1), got {}",
                self.hard_pressure
            )));
        }
        if self.sample_period_ms == 0 {
            return Err(CacheError::memory("sample_period_ms must be nonzero"));
        }
        Ok(())
    }
}

/// Live, atomically adjustable bound state shared by both cache policies.
///
/// Bounds are plain atomics so they can be tuned while caller threads are
/// inserting; a stale read only shifts which insert triggers the purge.
#[derive(Debug)]
pub(crate) struct CacheBounds {
    upper_bound: AtomicUsize,
    purge_step: AtomicUsize,
    mean_member_size: AtomicU64,
}

impl CacheBounds {
    pub(crate) fn new(config: &CacheConfig) -> Self {
        Self {
            upper_bound: AtomicUsize::new(config.upper_bound.max(1)),
            purge_step: AtomicUsize::new(config.purge_step.max(1)),
            mean_member_size: AtomicU64::new(0),
        }
    }

    pub(crate) fn upper_bound(&self) -> usize {
        self.upper_bound.load(Ordering::Relaxed)
    }

    pub(crate) fn set_upper_bound(&self, bound: usize) {
        self.upper_bound.store(bound.max(1), Ordering::Relaxed);
    }

    pub(crate) fn purge_step(&self) -> usize {
        self.purge_step.load(Ordering::Relaxed)
    }

    pub(crate) fn set_purge_step(&self, step: usize) {
        self.purge_step.store(step.max(1), Ordering::Relaxed);
    }

    pub(crate) fn mean_member_size(&self) -> u64 {
        self.mean_member_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_mean_member_size(&self, size: u64) {
        self.mean_member_size.store(size, Ordering::Relaxed);
    }
}
