//! # Tagcache Core Library
//!
//! In-process cache mapping keys to lazily computed values.
//!
//! ## Architecture
//!
//! - **Cache**: key map and tag index kept consistent without a global lock
//! - **Lazy cells**: at-most-once materialization shared by racing callers
//! - **Sweeper**: throttled background reclamation of expired entries and
//!   drained tag indices
//! - **Error**: unified error type for every cache operation
//! - **Blocking**: synchronous bridge for asynchronously produced values
//!
//! Eviction is driven by time and tags only: there is no capacity bound, and
//! expiry is checked lazily on access plus the periodic sweep, so an entry
//! may outlive its nominal deadline by up to one scan window.

pub mod blocking;
pub mod cache;
pub mod error;

pub use cache::{CacheConfig, Expiration, TagCache};
pub use error::{CacheError, Result};
