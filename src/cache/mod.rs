//! Generic caching layer for data persistence and offline support.
//!
//! This module provides an entity-agnostic cache that:
//! - Stores payloads as `{ data, timestamp }` JSON in a key-value store
//! - Evaluates staleness at read time against a freshness window
//! - Serves any cached copy when offline or when the network fails
//! - Patches single items inside cached collections

mod layer;
mod traits;

pub use layer::CacheStore;
pub(crate) use layer::{merge_object, record_id};
pub use traits::{CacheEntry, CacheKey, CacheRead, CacheResult, CacheSource};
