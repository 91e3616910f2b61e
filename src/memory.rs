//! Process memory figures
//!
//! The pressure monitor needs three numbers: total, strictly-free, and
//! available (free plus reclaimable) memory. On Linux they come from
//! `/proc/meminfo`; parsing is split from I/O so it can be tested against
//! canned input. Everything else in the library consumes the figures through
//! the [`MemorySource`] trait, which tests replace with a mock.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};

/// A snapshot of process-visible memory, in bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryInfo {
    /// Total memory
    pub total: u64,
    /// Strictly free memory
    pub free: u64,
    /// Free plus reclaimable memory
    pub available: u64,
}

impl MemoryInfo {
    /// Fraction of memory in use, counting reclaimable memory as headroom.
    ///
    /// This is `1 - available/total`, the figure compared against the soft
    /// threshold.
    pub fn pressure(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        1.0 - (self.available as f64 / self.total as f64)
    }

    /// Fraction of memory in use, counting only strictly-free memory as
    /// headroom.
    ///
    /// This is `1 - free/total`, the figure compared against the hard
    /// threshold before a critical purge.
    pub fn strict_pressure(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        1.0 - (self.free as f64 / self.total as f64)
    }

    /// Memory currently in use
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }
}

/// Supplier of memory figures for the pressure monitor
pub trait MemorySource: Send + Sync {
    /// Take a fresh memory snapshot
    fn sample(&self) -> Result<MemoryInfo>;
}

/// Reads `/proc/meminfo` on Linux
#[derive(Debug, Default)]
pub struct ProcMemorySource;

impl ProcMemorySource {
    pub fn new() -> Self {
        Self
    }
}

impl MemorySource for ProcMemorySource {
    #[cfg(target_os = "linux")]
    fn sample(&self) -> Result<MemoryInfo> {
        let content = std::fs::read_to_string("/proc/meminfo")?;
        parse_meminfo(&content)
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self) -> Result<MemoryInfo> {
        Err(CacheError::memory(
            "memory figures are not available on this platform",
        ))
    }
}

/// Parse `/proc/meminfo` content. Values are reported in kB and converted
/// to bytes.
fn parse_meminfo(content: &str) -> Result<MemoryInfo> {
    let mut total = None;
    let mut free = None;
    let mut available = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let label = match parts.next() {
            Some(label) => label,
            None => continue,
        };
        let value = match parts.next().and_then(|v| v.parse::<u64>().ok()) {
            Some(value) => value * 1024,
            None => continue,
        };

        match label {
            "MemTotal:" => total = Some(value),
            "MemFree:" => free = Some(value),
            "MemAvailable:" => available = Some(value),
            _ => {}
        }
    }

    let total = total.ok_or_else(|| CacheError::memory("MemTotal not found"))?;
    let free = free.ok_or_else(|| CacheError::memory("MemFree not found"))?;
    // MemAvailable is present on any kernel from the last decade; fall back
    // to MemFree rather than failing if it is missing.
    let available = available.unwrap_or(free);

    Ok(MemoryInfo {
        total,
        free,
        available,
    })
}
