//! # Tagcache Error Types
//!
//! Centralized error handling for the cache library.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Failure produced by a value factory, shared by every caller that awaited it.
pub type FactoryError = Arc<anyhow::Error>;

/// Core error types for the cache
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Rejected argument (zero lifetime, zero scan frequency, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Key not present or already expired
    #[error("Key not found in cache")]
    KeyMiss,

    /// A value factory failed while materializing an entry
    #[error("Value factory failed: {0}")]
    Factory(FactoryError),

    /// The stored value has a different type than the one requested
    #[error("Type mismatch: requested `{expected}`, cached `{found}`")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Create a new invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Wrap a factory failure
    pub fn factory(err: anyhow::Error) -> Self {
        Self::Factory(Arc::new(err))
    }

    pub fn type_mismatch<V>(found: &'static str) -> Self {
        Self::TypeMismatch {
            expected: std::any::type_name::<V>(),
            found,
        }
    }

    /// Whether this is a plain cache miss
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::KeyMiss)
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}
