//! Core types for the caching system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of a cached object or collection (e.g. `project_tasks_cache_<id>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(key: impl Into<String>) -> Self {
    Self(key.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Stored form of a cache entry: `{ "data": ..., "timestamp": <epoch millis> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: T,
  /// When the payload was captured. Zero marks a placeholder that is
  /// always stale for online readers.
  pub timestamp: i64,
}

impl<T> CacheEntry<T> {
  pub fn new(data: T, timestamp: i64) -> Self {
    Self { data, timestamp }
  }

  /// Capture time as a UTC datetime.
  pub fn captured_at(&self) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(self.timestamp)
  }
}

/// Outcome of a cache lookup against a freshness window.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRead<T> {
  /// Usable as-is: within the window, or the caller is offline.
  Fresh(CacheEntry<T>),
  /// Present but older than the window; the caller should refetch.
  Stale(CacheEntry<T>),
  Missing,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(entry: CacheEntry<T>, is_stale: bool) -> Self {
    let cached_at = entry.captured_at();
    Self {
      data: entry.data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(entry: CacheEntry<T>) -> Self {
    let cached_at = entry.captured_at();
    Self {
      data: entry.data,
      source: CacheSource::Offline,
      cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, considered stale but the network fetch failed
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}
