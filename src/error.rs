//! Error handling for the caching library
//!
//! Absence of a key is never an error: lookups report it with `None`.
//! Errors are reserved for misuse (asking a cache to compute without a
//! mapping function) and for memory-figure acquisition failures.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// A compute operation was invoked without a configured mapping function
    #[error("no mapping function configured: {message}")]
    MissingMapper { message: String },

    /// Process memory figures could not be obtained or parsed
    #[error("memory statistics error: {message}")]
    Memory { message: String },

    /// I/O errors (reading /proc/meminfo and the like)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Create a missing-mapper error
    pub fn missing_mapper(message: impl Into<String>) -> Self {
        Self::MissingMapper {
            message: message.into(),
        }
    }

    /// Create a memory-statistics error
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }
}
