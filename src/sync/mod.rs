//! Replays queued offline changes and rebuilds the cache.

mod engine;
mod report;

pub use engine::{SyncEngine, IS_SYNCING_KEY, LAST_SYNCED_KEY};
pub use report::{SkipReason, SyncReport};
