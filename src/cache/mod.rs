//! Tagged, TTL-capped result caching over an external key-value store
//! for out-of-process backends.

pub mod coordinator;
pub mod fingerprint;
pub mod invalidation;
pub mod store;

pub use coordinator::{CacheCoordinator, CacheKey, CacheStatsSnapshot, Cacheable, CleanupHandle};
pub use store::{CacheStore, StoreError};
