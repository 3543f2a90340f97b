//! Cache layer for synced provider data
//!
//! Adapters keep the records pulled by bulk sync here so reads can be served
//! without a round trip until the entry expires or a webhook invalidates it.

mod resource;

pub use resource::{CacheConfig, CacheStats, ResourceCache};
