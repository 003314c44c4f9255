//! Entity adapters: the cache/queue pattern applied to each record type.

mod adapter;
pub mod cascade;
mod def;
mod notifications;
mod preferences;
pub mod progress;

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::connectivity::{self, ConnectivityProbe};
use crate::kv::KeyValueStore;
use crate::queue::ChangeQueue;
use crate::remote::RemoteStore;

pub use adapter::EntityAdapter;
pub use def::*;
pub use preferences::{Preferences, PENDING_THEME_KEY};

/// Prefix of ids assigned to records created while offline.
pub const TEMP_ID_PREFIX: &str = "temp_";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a temporary id, `temp_<millis>_<n>`.
pub fn temp_id() -> String {
  let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("{}{}_{}", TEMP_ID_PREFIX, crate::now_millis(), n)
}

pub fn is_temp_id(id: &str) -> bool {
  id.starts_with(TEMP_ID_PREFIX)
}

/// True when any top-level string field of `value` holds a temporary id.
///
/// Such a record cannot be written remotely until its references are synced.
pub fn references_temp(value: &Value) -> bool {
  value
    .as_object()
    .map(|fields| fields.values().any(|v| v.as_str().is_some_and(is_temp_id)))
    .unwrap_or(false)
}

/// Collaborators shared by every adapter and the sync engine.
pub struct Services {
  pub kv: Arc<dyn KeyValueStore>,
  pub cache: CacheStore,
  pub queue: ChangeQueue,
  pub remote: Arc<dyn RemoteStore>,
  pub probe: Arc<dyn ConnectivityProbe>,
}

impl Services {
  pub fn new(
    kv: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteStore>,
    probe: Arc<dyn ConnectivityProbe>,
  ) -> Self {
    Self {
      cache: CacheStore::new(Arc::clone(&kv)),
      queue: ChangeQueue::new(Arc::clone(&kv)),
      kv,
      remote,
      probe,
    }
  }

  /// Set the freshness window used for reads.
  pub fn with_stale_time(mut self, stale_time: chrono::Duration) -> Self {
    self.cache = self.cache.with_stale_time(stale_time);
    self
  }

  /// Current connectivity, with probe failures treated as offline.
  pub async fn is_online(&self) -> bool {
    connectivity::check(self.probe.as_ref()).await
  }
}
