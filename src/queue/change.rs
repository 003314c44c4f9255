//! Pending change model.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::remote::Filter;
use crate::table::Table;

/// Kind of queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
  Insert,
  Update,
  Delete,
  MarkAllRead,
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Insert => write!(f, "INSERT"),
      Self::Update => write!(f, "UPDATE"),
      Self::Delete => write!(f, "DELETE"),
      Self::MarkAllRead => write!(f, "MARK_ALL_READ"),
    }
  }
}

/// Payload of a `MARK_ALL_READ` change: a filter and the patch to apply to
/// every matching row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkUpdate {
  pub filter: Filter,
  pub patch: Value,
}

/// A mutation made while offline, waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
  /// Queue entry id (not the target record id).
  pub id: String,
  pub table_name: Table,
  /// Target record. May be a temporary id for inserts.
  pub record_id: String,
  pub operation: Operation,
  /// Full record for inserts, a patch for updates, null for deletes.
  pub data: Option<Value>,
  /// Creation time in epoch millis.
  pub created_at: i64,
  /// Monotonic sequence, breaks ties between equal `created_at`.
  #[serde(default)]
  pub seq: u64,
  #[serde(default)]
  pub synced: bool,
  /// Failed replay attempts so far.
  #[serde(default)]
  pub retry_count: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
}

impl PendingChange {
  /// Build a change that has not been enqueued yet. The queue assigns
  /// `id` and `seq`.
  pub fn new(table: Table, record_id: impl Into<String>, operation: Operation, data: Option<Value>) -> Self {
    Self {
      id: String::new(),
      table_name: table,
      record_id: record_id.into(),
      operation,
      data,
      created_at: crate::now_millis(),
      seq: 0,
      synced: false,
      retry_count: 0,
      last_error: None,
    }
  }

  pub fn insert(table: Table, record_id: impl Into<String>, record: Value) -> Self {
    Self::new(table, record_id, Operation::Insert, Some(record))
  }

  pub fn update(table: Table, record_id: impl Into<String>, patch: Value) -> Self {
    Self::new(table, record_id, Operation::Update, Some(patch))
  }

  pub fn delete(table: Table, record_id: impl Into<String>) -> Self {
    Self::new(table, record_id, Operation::Delete, None)
  }

  pub fn mark_all_read(table: Table, bulk: &BulkUpdate) -> Result<Self> {
    let data = serde_json::to_value(bulk)
      .map_err(|e| eyre!("Failed to serialize bulk update of {}: {}", table, e))?;
    Ok(Self::new(table, "*", Operation::MarkAllRead, Some(data)))
  }

  /// Override the creation time.
  pub fn with_created_at(mut self, created_at: i64) -> Self {
    self.created_at = created_at;
    self
  }

  /// Ordering key used by the queue.
  pub fn order_key(&self) -> (i64, u64) {
    (self.created_at, self.seq)
  }
}
