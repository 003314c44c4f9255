//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{merge_object, record_id};
use crate::connectivity::StaticProbe;
use crate::entity::Services;
use crate::kv::MemoryStore;
use crate::remote::{Filter, RemoteStore};
use crate::table::Table;

/// Remote store backed by in-memory tables.
///
/// Calls are logged as `op:table` or `op:table:id`. Failures can be injected
/// for either form.
#[derive(Default)]
pub struct MockRemote {
  tables: Mutex<HashMap<Table, Vec<Value>>>,
  calls: Mutex<Vec<String>>,
  failing: Mutex<HashSet<String>>,
  next_id: Mutex<u64>,
  delay: Mutex<Option<Duration>>,
}

fn label_matches(call: &str, label: &str) -> bool {
  call == label || call.starts_with(&format!("{}:", label))
}

impl MockRemote {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn seed(&self, table: Table, row: Value) {
    self.tables.lock().unwrap().entry(table).or_default().push(row);
  }

  pub fn rows(&self, table: Table) -> Vec<Value> {
    self.tables.lock().unwrap().get(&table).cloned().unwrap_or_default()
  }

  pub fn fail_on(&self, label: &str) {
    self.failing.lock().unwrap().insert(label.to_string());
  }

  pub fn recover(&self) {
    self.failing.lock().unwrap().clear();
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  /// Number of calls matching `label` (`op:table` also matches `op:table:id`).
  pub fn count(&self, label: &str) -> usize {
    self.calls().iter().filter(|c| label_matches(c, label)).count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  async fn call(&self, call: String) -> Result<()> {
    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    self.calls.lock().unwrap().push(call.clone());
    let failing = self.failing.lock().unwrap();
    if failing.iter().any(|label| label_matches(&call, label)) {
      return Err(eyre!("Injected failure for {}", call));
    }
    Ok(())
  }

  fn canonical_id(&self) -> String {
    let mut next = self.next_id.lock().unwrap();
    *next += 1;
    format!("srv_{}", next)
  }
}

#[async_trait]
impl RemoteStore for MockRemote {
  async fn list(&self, table: Table, filter: &Filter) -> Result<Vec<Value>> {
    self.call(format!("list:{}", table)).await?;
    Ok(self.rows(table).into_iter().filter(|row| filter.matches(row)).collect())
  }

  async fn get(&self, table: Table, id: &str) -> Result<Option<Value>> {
    self.call(format!("get:{}:{}", table, id)).await?;
    Ok(self.rows(table).into_iter().find(|row| record_id(row) == Some(id)))
  }

  async fn insert(&self, table: Table, record: &Value) -> Result<Value> {
    let mut row = record.clone();
    let id = match record_id(&row) {
      Some(id) if !id.is_empty() => id.to_string(),
      _ => self.canonical_id(),
    };
    self.call(format!("insert:{}:{}", table, id)).await?;
    if let Some(fields) = row.as_object_mut() {
      fields.insert("id".to_string(), Value::String(id));
    }
    self.seed(table, row.clone());
    Ok(row)
  }

  async fn update(&self, table: Table, id: &str, patch: &Value) -> Result<Value> {
    self.call(format!("update:{}:{}", table, id)).await?;
    let mut tables = self.tables.lock().unwrap();
    let row = tables
      .entry(table)
      .or_default()
      .iter_mut()
      .find(|row| record_id(row) == Some(id))
      .ok_or_else(|| eyre!("No {} row {}", table, id))?;
    merge_object(row, patch);
    Ok(row.clone())
  }

  async fn delete(&self, table: Table, id: &str) -> Result<()> {
    self.call(format!("delete:{}:{}", table, id)).await?;
    if let Some(rows) = self.tables.lock().unwrap().get_mut(&table) {
      rows.retain(|row| record_id(row) != Some(id));
    }
    Ok(())
  }

  async fn update_where(&self, table: Table, filter: &Filter, patch: &Value) -> Result<u64> {
    self.call(format!("update_where:{}", table)).await?;
    let mut tables = self.tables.lock().unwrap();
    let mut updated = 0;
    for row in tables.entry(table).or_default().iter_mut().filter(|row| filter.matches(row)) {
      merge_object(row, patch);
      updated += 1;
    }
    Ok(updated)
  }
}

/// Services wired to a memory store, a mock remote and a switchable probe.
pub struct Harness {
  pub services: Arc<Services>,
  pub remote: Arc<MockRemote>,
  pub probe: Arc<StaticProbe>,
}

impl Harness {
  pub fn new(online: bool) -> Self {
    let remote = Arc::new(MockRemote::new());
    let probe = Arc::new(StaticProbe::new(online));
    let services = Arc::new(Services::new(
      Arc::new(MemoryStore::new()),
      remote.clone(),
      probe.clone(),
    ));
    Self {
      services,
      remote,
      probe,
    }
  }

  pub fn online() -> Self {
    Self::new(true)
  }

  pub fn offline() -> Self {
    Self::new(false)
  }

  /// Flip connectivity, e.g. to replay work recorded offline.
  pub fn set_online(&self, online: bool) {
    self.probe.set_online(online);
  }
}
