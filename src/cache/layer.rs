//! Cache store that orchestrates freshness checks with network fetching.

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::{CacheEntry, CacheKey, CacheRead, CacheResult};
use crate::kv::KeyValueStore;
use crate::now_millis;

/// Read-through cache on top of a key-value store.
///
/// Every entry carries the time it was captured. Staleness is decided at read
/// time against a freshness window; entries never expire on their own.
pub struct CacheStore {
  kv: Arc<dyn KeyValueStore>,
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl CacheStore {
  /// Create a new cache store with the default five minute window.
  pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
    Self {
      kv,
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Check if an entry captured at `timestamp` is outside `window`.
  fn is_stale(timestamp: i64, window: Duration) -> bool {
    now_millis() - timestamp >= window.num_milliseconds()
  }

  /// Get the raw entry for `key` without any freshness evaluation.
  ///
  /// Entries that no longer decode as `T` are reported as absent.
  pub fn peek<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<CacheEntry<T>>> {
    let Some(raw) = self.kv.get(key.as_str())? else {
      return Ok(None);
    };

    match serde_json::from_str(&raw) {
      Ok(entry) => Ok(Some(entry)),
      Err(e) => {
        warn!(key = %key, error = %e, "Ignoring undecodable cache entry");
        Ok(None)
      }
    }
  }

  /// Look up `key` against the configured freshness window.
  pub fn read<T: DeserializeOwned>(&self, key: &CacheKey, online: bool) -> Result<CacheRead<T>> {
    self.read_within(key, self.stale_time, online)
  }

  /// Look up `key` against an explicit freshness window.
  ///
  /// When `online` is false the age of the entry is ignored.
  pub fn read_within<T: DeserializeOwned>(
    &self,
    key: &CacheKey,
    window: Duration,
    online: bool,
  ) -> Result<CacheRead<T>> {
    Ok(match self.peek(key)? {
      None => CacheRead::Missing,
      Some(entry) if !online || !Self::is_stale(entry.timestamp, window) => CacheRead::Fresh(entry),
      Some(entry) => CacheRead::Stale(entry),
    })
  }

  /// Store `data` under `key`, captured now.
  pub fn write<T: Serialize>(&self, key: &CacheKey, data: &T) -> Result<()> {
    self.write_entry(key, &CacheEntry::new(data, now_millis()))
  }

  /// Store a complete entry, including its capture time.
  pub fn write_entry<T: Serialize>(&self, key: &CacheKey, entry: &CacheEntry<T>) -> Result<()> {
    let raw = serde_json::to_string(entry)
      .map_err(|e| eyre!("Failed to serialize cache entry {}: {}", key, e))?;
    self.kv.set(key.as_str(), &raw)
  }

  pub fn remove(&self, key: &CacheKey) -> Result<()> {
    self.kv.remove(key.as_str())
  }

  /// Keys currently cached under `prefix`.
  pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<CacheKey>> {
    Ok(
      self
        .kv
        .keys_with_prefix(prefix)?
        .into_iter()
        .map(CacheKey::new)
        .collect(),
    )
  }

  /// Merge the fields of `partial` into an object payload.
  ///
  /// Returns false when there is nothing to patch. The capture time is kept.
  pub fn patch(&self, key: &CacheKey, partial: &Value) -> Result<bool> {
    let Some(mut entry) = self.peek::<Value>(key)? else {
      return Ok(false);
    };
    if !entry.data.is_object() {
      return Ok(false);
    }

    merge_object(&mut entry.data, partial);
    self.write_entry(key, &entry)?;
    Ok(true)
  }

  /// Insert or replace `record` (matched by `id`) in a collection payload.
  ///
  /// A missing collection is created as a placeholder with capture time zero,
  /// so online readers still fetch the complete list.
  pub fn upsert_item(&self, key: &CacheKey, record: &Value) -> Result<()> {
    let id = record_id(record).ok_or_else(|| eyre!("Cannot cache record without id in {}", key))?;

    let Some(mut entry) = self.peek::<Value>(key)? else {
      debug!(key = %key, "Creating placeholder collection");
      return self.write_entry(key, &CacheEntry::new(Value::Array(vec![record.clone()]), 0));
    };

    let Some(items) = entry.data.as_array_mut() else {
      warn!(key = %key, "Cache entry is not a collection, skipping upsert");
      return Ok(());
    };

    match items.iter_mut().find(|item| record_id(item) == Some(id)) {
      Some(existing) => *existing = record.clone(),
      // New records go first (most recent)
      None => items.insert(0, record.clone()),
    }

    self.write_entry(key, &entry)
  }

  /// Merge `partial` into the item with `id` in a collection payload.
  ///
  /// Returns the merged item when it was found.
  pub fn patch_item(&self, key: &CacheKey, id: &str, partial: &Value) -> Result<Option<Value>> {
    let Some(mut entry) = self.peek::<Value>(key)? else {
      return Ok(None);
    };
    let Some(items) = entry.data.as_array_mut() else {
      return Ok(None);
    };
    let Some(item) = items.iter_mut().find(|item| record_id(item) == Some(id)) else {
      return Ok(None);
    };

    merge_object(item, partial);
    let merged = item.clone();
    self.write_entry(key, &entry)?;
    Ok(Some(merged))
  }

  /// Remove the item with `id` from a collection payload, returning it.
  pub fn remove_item(&self, key: &CacheKey, id: &str) -> Result<Option<Value>> {
    let Some(mut entry) = self.peek::<Value>(key)? else {
      return Ok(None);
    };
    let Some(items) = entry.data.as_array_mut() else {
      return Ok(None);
    };
    let Some(position) = items.iter().position(|item| record_id(item) == Some(id)) else {
      return Ok(None);
    };

    let removed = items.remove(position);
    self.write_entry(key, &entry)?;
    Ok(Some(removed))
  }

  /// Replace the item with `old_id` by `record` in place.
  ///
  /// Returns false when the collection or the item is not cached.
  pub fn replace_item_id(&self, key: &CacheKey, old_id: &str, record: &Value) -> Result<bool> {
    let Some(mut entry) = self.peek::<Value>(key)? else {
      return Ok(false);
    };
    let Some(items) = entry.data.as_array_mut() else {
      return Ok(false);
    };
    let Some(item) = items.iter_mut().find(|item| record_id(item) == Some(old_id)) else {
      return Ok(false);
    };

    *item = record.clone();
    self.write_entry(key, &entry)?;
    Ok(true)
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Offline: return whatever is cached, regardless of age
  /// 2. Fresh cache: return immediately
  /// 3. Stale: fetch from network, falling back to the stale entry on failure
  /// 4. Missing: fetch from network and store the result
  ///
  /// Returns `None` only when offline with nothing cached.
  pub async fn fetch<T, F, Fut>(
    &self,
    key: &CacheKey,
    online: bool,
    fetcher: F,
  ) -> Result<Option<CacheResult<T>>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    match self.read::<T>(key, online)? {
      CacheRead::Fresh(entry) => {
        debug!(key = %key, online, "Serving cached entry");
        if online {
          Ok(Some(CacheResult::from_cache(entry, false)))
        } else {
          Ok(Some(CacheResult::offline(entry)))
        }
      }
      CacheRead::Stale(entry) => match fetcher().await {
        Ok(data) => {
          self.write(key, &data)?;
          Ok(Some(CacheResult::from_network(data)))
        }
        Err(e) => {
          // Network failed, return stale cache
          warn!(key = %key, error = %e, "Refresh failed, serving stale cache");
          Ok(Some(CacheResult::from_cache(entry, true)))
        }
      },
      CacheRead::Missing => {
        if !online {
          debug!(key = %key, "Offline with nothing cached");
          return Ok(None);
        }
        let data = fetcher().await?;
        self.write(key, &data)?;
        Ok(Some(CacheResult::from_network(data)))
      }
    }
  }
}

impl Clone for CacheStore {
  fn clone(&self) -> Self {
    Self {
      kv: Arc::clone(&self.kv),
      stale_time: self.stale_time,
    }
  }
}

/// The `id` field of a JSON record.
pub(crate) fn record_id(record: &Value) -> Option<&str> {
  record.get("id").and_then(Value::as_str)
}

/// Shallow-merge the fields of `partial` into `target` when both are objects.
pub(crate) fn merge_object(target: &mut Value, partial: &Value) {
  if let (Some(target), Some(partial)) = (target.as_object_mut(), partial.as_object()) {
    for (field, value) in partial {
      target.insert(field.clone(), value.clone());
    }
  }
}
