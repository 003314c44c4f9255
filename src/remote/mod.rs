//! Remote data store contract.
//!
//! The backend is the source of truth for every record. The core only needs
//! row-level CRUD plus one bulk update, all keyed by logical table.

mod rest;

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::table::Table;

pub use rest::RestRemote;

/// Equality filter over record fields.
///
/// Serialized as a plain object, e.g. `{"user_id": "u1"}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
  conditions: BTreeMap<String, Value>,
}

impl Filter {
  /// Filter matching every row.
  pub fn new() -> Self {
    Self::default()
  }

  /// Require `field == value`.
  pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.conditions.insert(field.into(), value.into());
    self
  }

  pub fn is_empty(&self) -> bool {
    self.conditions.is_empty()
  }

  pub fn conditions(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.conditions.iter().map(|(k, v)| (k.as_str(), v))
  }

  /// Check whether a JSON record satisfies every condition.
  pub fn matches(&self, record: &Value) -> bool {
    self
      .conditions
      .iter()
      .all(|(field, expected)| record.get(field) == Some(expected))
  }
}

/// Operations the core needs from the remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
  /// All rows of `table` matching `filter`.
  async fn list(&self, table: Table, filter: &Filter) -> Result<Vec<Value>>;

  /// One row by id.
  async fn get(&self, table: Table, id: &str) -> Result<Option<Value>>;

  /// Insert a row and return it as stored, including its canonical id.
  async fn insert(&self, table: Table, record: &Value) -> Result<Value>;

  /// Apply a partial update to one row and return the updated row.
  async fn update(&self, table: Table, id: &str, patch: &Value) -> Result<Value>;

  async fn delete(&self, table: Table, id: &str) -> Result<()>;

  /// Apply `patch` to every row matching `filter`. Returns the number of rows.
  async fn update_where(&self, table: Table, filter: &Filter, patch: &Value) -> Result<u64>;
}
