//! Durable string-keyed storage shared by the cache and the change queue.

mod sqlite;

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

pub use sqlite::SqliteStore;

/// Trait for key-value storage backends.
///
/// Values are opaque strings (JSON in practice). A missing key is not an error.
pub trait KeyValueStore: Send + Sync {
  /// Get the value stored under `key`.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Store `value` under `key`, replacing any previous value.
  fn set(&self, key: &str, value: &str) -> Result<()>;

  /// Remove `key`. Removing a missing key succeeds.
  fn remove(&self, key: &str) -> Result<()>;

  /// List all keys in ascending order.
  fn keys(&self) -> Result<Vec<String>>;

  /// List keys starting with `prefix`.
  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    Ok(
      self
        .keys()?
        .into_iter()
        .filter(|k| k.starts_with(prefix))
        .collect(),
    )
  }
}

/// Process-local store. Used when no persistent path is wanted.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.keys().cloned().collect())
  }
}
