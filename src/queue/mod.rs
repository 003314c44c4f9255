//! Durable queue of mutations made while offline.
//!
//! The queue is stored as a JSON array under `offlineChanges`. Entries are
//! appended in arrival order and replayed in `(created_at, seq)` order.

mod change;

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::kv::KeyValueStore;

pub use change::{BulkUpdate, Operation, PendingChange};

/// Storage key of the queued changes.
pub const QUEUE_KEY: &str = "offlineChanges";

/// Storage key of the last assigned sequence number.
pub const SEQ_KEY: &str = "offlineChangesSeq";

pub struct ChangeQueue {
  kv: Arc<dyn KeyValueStore>,
  /// Serializes read-modify-write cycles on the queue key.
  lock: Mutex<()>,
}

impl ChangeQueue {
  pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
    Self {
      kv,
      lock: Mutex::new(()),
    }
  }

  fn load(&self) -> Result<Vec<PendingChange>> {
    match self.kv.get(QUEUE_KEY)? {
      Some(raw) => {
        serde_json::from_str(&raw).map_err(|e| eyre!("Failed to decode offline change queue: {}", e))
      }
      None => Ok(Vec::new()),
    }
  }

  fn save(&self, changes: &[PendingChange]) -> Result<()> {
    let raw = serde_json::to_string(changes)
      .map_err(|e| eyre!("Failed to serialize offline change queue: {}", e))?;
    self.kv.set(QUEUE_KEY, &raw)
  }

  fn next_seq(&self, existing: &[PendingChange]) -> Result<u64> {
    let stored = self
      .kv
      .get(SEQ_KEY)?
      .and_then(|raw| raw.parse::<u64>().ok())
      .unwrap_or(0);
    let highest = existing.iter().map(|c| c.seq).max().unwrap_or(0);
    let seq = stored.max(highest) + 1;
    self.kv.set(SEQ_KEY, &seq.to_string())?;
    Ok(seq)
  }

  /// Append a change. Assigns the entry id and sequence number.
  ///
  /// Changes to the same record are never merged.
  pub fn enqueue(&self, mut change: PendingChange) -> Result<PendingChange> {
    let _guard = self.lock.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut changes = self.load()?;
    change.seq = self.next_seq(&changes)?;
    change.id = format!("chg_{}_{}", change.created_at, change.seq);

    changes.push(change.clone());
    self.save(&changes)?;

    debug!(
      id = %change.id,
      table = %change.table_name,
      record = %change.record_id,
      operation = %change.operation,
      "Queued offline change"
    );
    Ok(change)
  }

  /// All queued changes in replay order. Does not remove anything.
  pub fn drain(&self) -> Result<Vec<PendingChange>> {
    let mut changes = self.load()?;
    changes.sort_by_key(PendingChange::order_key);
    Ok(changes)
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.load()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Empty the queue unconditionally.
  pub fn clear(&self) -> Result<()> {
    let _guard = self.lock.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    self.save(&[])
  }

  /// Reconcile the queue after a replay pass.
  ///
  /// Entries in `processed` are removed, entries in `retained` replace their
  /// stored version. Anything enqueued after the drain is left alone.
  pub fn settle(&self, processed: &HashSet<String>, retained: &[PendingChange]) -> Result<()> {
    let _guard = self.lock.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut updates: HashMap<&str, &PendingChange> =
      retained.iter().map(|c| (c.id.as_str(), c)).collect();

    let changes: Vec<PendingChange> = self
      .load()?
      .into_iter()
      .filter(|c| !processed.contains(&c.id))
      .map(|c| match updates.remove(c.id.as_str()) {
        Some(updated) => updated.clone(),
        None => c,
      })
      .collect();

    self.save(&changes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::kv::{MemoryStore, SqliteStore};
  use crate::table::Table;
  use serde_json::json;
  use tempfile::tempdir;

  fn queue() -> ChangeQueue {
    ChangeQueue::new(Arc::new(MemoryStore::new()))
  }

  #[test]
  fn test_enqueue_assigns_ids_and_sequence() {
    let queue = queue();
    let a = queue
      .enqueue(PendingChange::insert(Table::Tasks, "temp_1", json!({"id": "temp_1"})))
      .unwrap();
    let b = queue.enqueue(PendingChange::delete(Table::Tasks, "t2")).unwrap();

    assert_eq!(a.seq, 1);
    assert_eq!(b.seq, 2);
    assert!(a.id.starts_with("chg_"));
    assert_ne!(a.id, b.id);
    assert_eq!(queue.len().unwrap(), 2);
  }

  #[test]
  fn test_drain_orders_by_created_at_regardless_of_insertion() {
    let queue = queue();
    for created_at in [300, 100, 200] {
      queue
        .enqueue(PendingChange::update(Table::Tasks, "t1", json!({"n": created_at})).with_created_at(created_at))
        .unwrap();
    }

    let drained: Vec<i64> = queue.drain().unwrap().iter().map(|c| c.created_at).collect();
    assert_eq!(drained, vec![100, 200, 300]);
    // Draining does not consume
    assert_eq!(queue.len().unwrap(), 3);
  }

  #[test]
  fn test_same_millisecond_changes_keep_enqueue_order() {
    let queue = queue();
    for n in 0..5 {
      queue
        .enqueue(PendingChange::update(Table::Tasks, "t1", json!({"n": n})).with_created_at(1000))
        .unwrap();
    }

    let drained: Vec<i64> = queue
      .drain()
      .unwrap()
      .iter()
      .map(|c| c.data.as_ref().unwrap()["n"].as_i64().unwrap())
      .collect();
    assert_eq!(drained, vec![0, 1, 2, 3, 4]);
  }

  #[test]
  fn test_duplicate_updates_are_not_coalesced() {
    let queue = queue();
    queue.enqueue(PendingChange::update(Table::Tasks, "t1", json!({"title": "a"}))).unwrap();
    queue.enqueue(PendingChange::update(Table::Tasks, "t1", json!({"title": "b"}))).unwrap();
    assert_eq!(queue.len().unwrap(), 2);
  }

  #[test]
  fn test_clear() {
    let queue = queue();
    queue.enqueue(PendingChange::delete(Table::Projects, "p1")).unwrap();
    queue.clear().unwrap();
    assert!(queue.is_empty().unwrap());
  }

  #[test]
  fn test_sequence_survives_clear() {
    let queue = queue();
    queue.enqueue(PendingChange::delete(Table::Projects, "p1")).unwrap();
    queue.clear().unwrap();
    let next = queue.enqueue(PendingChange::delete(Table::Projects, "p2")).unwrap();
    assert_eq!(next.seq, 2);
  }

  #[test]
  fn test_queue_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
      let queue = ChangeQueue::new(Arc::new(SqliteStore::open(&path).unwrap()));
      queue
        .enqueue(PendingChange::update(Table::Tasks, "t1", json!({"n": 2})).with_created_at(20))
        .unwrap();
      queue
        .enqueue(PendingChange::update(Table::Tasks, "t1", json!({"n": 1})).with_created_at(10))
        .unwrap();
    }

    let reopened = ChangeQueue::new(Arc::new(SqliteStore::open(&path).unwrap()));
    let drained = reopened.drain().unwrap();
    assert_eq!(drained.len(), 2);
    assert_eq!(drained[0].created_at, 10);
    assert_eq!(drained[1].created_at, 20);

    let next = reopened.enqueue(PendingChange::delete(Table::Tasks, "t1")).unwrap();
    assert_eq!(next.seq, 3);
  }

  #[test]
  fn test_settle_keeps_retained_and_late_arrivals() {
    let queue = queue();
    let a = queue.enqueue(PendingChange::delete(Table::Tasks, "a")).unwrap();
    let b = queue.enqueue(PendingChange::delete(Table::Tasks, "b")).unwrap();
    let drained = queue.drain().unwrap();
    assert_eq!(drained.len(), 2);

    // Enqueued while the pass was running
    let late = queue.enqueue(PendingChange::delete(Table::Tasks, "c")).unwrap();

    let mut failed = b.clone();
    failed.retry_count = 1;
    failed.last_error = Some("timeout".to_string());

    let processed: HashSet<String> = [a.id.clone()].into_iter().collect();
    queue.settle(&processed, &[failed]).unwrap();

    let remaining = queue.drain().unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].id, b.id);
    assert_eq!(remaining[0].retry_count, 1);
    assert_eq!(remaining[1].id, late.id);
  }
}
