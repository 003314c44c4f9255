use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{SkipReason, SyncReport};
use crate::cache::record_id;
use crate::entity::cascade::{self, CacheChange};
use crate::entity::{for_table, is_temp_id, EntityDef, Preferences, Services, TRACKED};
use crate::queue::{BulkUpdate, Operation, PendingChange};
use crate::remote::Filter;

/// `"true"` while a pass is running. Published for observers only.
pub const IS_SYNCING_KEY: &str = "isSyncing";

/// Epoch millis of the last completed pass.
pub const LAST_SYNCED_KEY: &str = "lastSyncedTime";

/// Replays the offline queue against the remote store.
///
/// Only one pass runs at a time. A call made while another pass is in flight
/// returns immediately with [`SkipReason::AlreadyRunning`].
pub struct SyncEngine {
  services: Arc<Services>,
  preferences: Preferences,
  user_id: Option<String>,
  max_retries: u32,
  guard: Mutex<()>,
}

impl SyncEngine {
  pub fn new(services: Arc<Services>, user_id: Option<String>, max_retries: u32) -> Self {
    Self {
      preferences: Preferences::new(Arc::clone(&services), user_id.clone()),
      services,
      user_id,
      max_retries,
      guard: Mutex::new(()),
    }
  }

  /// Whether a pass is currently marked as running.
  pub fn is_syncing(&self) -> Result<bool> {
    Ok(self.services.kv.get(IS_SYNCING_KEY)?.as_deref() == Some("true"))
  }

  /// Time of the last completed pass, in epoch millis.
  pub fn last_synced(&self) -> Result<Option<i64>> {
    Ok(
      self
        .services
        .kv
        .get(LAST_SYNCED_KEY)?
        .and_then(|raw| raw.parse::<i64>().ok()),
    )
  }

  fn set_syncing(&self, syncing: bool) -> Result<()> {
    self
      .services
      .kv
      .set(IS_SYNCING_KEY, if syncing { "true" } else { "false" })
  }

  /// Run one sync pass.
  pub async fn sync(&self) -> Result<SyncReport> {
    let Ok(_guard) = self.guard.try_lock() else {
      info!("Sync already running, skipping");
      return Ok(SyncReport::skipped(SkipReason::AlreadyRunning));
    };

    if !self.services.is_online().await {
      info!("Offline, sync postponed");
      return Ok(SyncReport::skipped(SkipReason::Offline));
    }

    self.set_syncing(true)?;
    let result = self.run().await;
    // The flag must not stay set after a failed pass
    if let Err(e) = self.set_syncing(false) {
      warn!(error = %e, "Failed to clear sync flag");
    }
    result
  }

  async fn run(&self) -> Result<SyncReport> {
    let changes = self.services.queue.drain()?;
    let has_theme = self.preferences.pending_theme()?.is_some();

    if changes.is_empty() && !has_theme {
      debug!("Nothing to sync");
      return Ok(SyncReport::skipped(SkipReason::NothingToSync));
    }

    info!(changes = changes.len(), has_theme, "Starting sync");
    let mut report = SyncReport::default();

    // Preferences go first so the profile is current before record changes
    if has_theme {
      match self.preferences.apply_pending().await {
        Ok(applied) => report.theme_applied = applied,
        Err(e) => warn!(error = %e, "Failed to apply pending theme change"),
      }
    }

    self.replay(changes, &mut report).await?;
    self.refresh(&mut report).await;
    self.reapply_queued();

    self
      .services
      .kv
      .set(LAST_SYNCED_KEY, &crate::now_millis().to_string())?;

    info!(
      applied = report.applied,
      failed = report.failed,
      dropped = report.dropped,
      retained = report.retained,
      "Sync finished"
    );
    Ok(report)
  }

  /// Dispatch every change in order, then settle the queue.
  async fn replay(&self, changes: Vec<PendingChange>, report: &mut SyncReport) -> Result<()> {
    let mut processed = HashSet::new();
    let mut retained = Vec::new();
    // Records with a failed change still queued; later changes to them wait
    let mut blocked: HashSet<String> = HashSet::new();

    for mut change in changes {
      remap_change(&mut change, &report.remapped);

      if blocked.contains(&change.record_id) || references_any(change.data.as_ref(), &blocked) {
        debug!(id = %change.id, record = %change.record_id, "Deferring change behind failed one");
        retained.push(change);
        continue;
      }

      match self.dispatch(&change).await {
        Ok(canonical) => {
          if let Some(canonical) = canonical {
            debug!(temp = %change.record_id, canonical = %canonical, "Temporary id replaced");
            report.remapped.insert(change.record_id.clone(), canonical);
          }
          report.applied += 1;
          processed.insert(change.id);
        }
        Err(e) => {
          report.failed += 1;
          change.retry_count += 1;
          change.last_error = Some(e.to_string());

          if change.retry_count <= self.max_retries {
            warn!(
              id = %change.id,
              table = %change.table_name,
              record = %change.record_id,
              operation = %change.operation,
              retry = change.retry_count,
              error = %e,
              "Change failed, will retry"
            );
            blocked.insert(change.record_id.clone());
            retained.push(change);
          } else {
            warn!(
              id = %change.id,
              table = %change.table_name,
              record = %change.record_id,
              operation = %change.operation,
              error = %e,
              "Change failed, dropping"
            );
            report.dropped += 1;
            processed.insert(change.id);
          }
        }
      }
    }

    report.retained = retained.len();
    self.services.queue.settle(&processed, &retained)
  }

  /// Send one change to the remote store.
  ///
  /// Returns the canonical id when a temporary record was inserted.
  async fn dispatch(&self, change: &PendingChange) -> Result<Option<String>> {
    let remote = &self.services.remote;
    let table = change.table_name;
    let def = for_table(table);

    match change.operation {
      Operation::Insert => {
        let mut record = change
          .data
          .clone()
          .ok_or_else(|| eyre!("Insert into {} without data", table))?;
        let temp = is_temp_id(&change.record_id);
        if temp {
          if let Some(fields) = record.as_object_mut() {
            fields.remove("id");
          }
        }

        let stored = remote.insert(table, &record).await?;
        if temp {
          self.cascade(def, CacheChange::Rekey {
            old_id: &change.record_id,
            record: &stored,
          });
          Ok(record_id(&stored).map(str::to_string))
        } else {
          self.cascade(def, CacheChange::Upsert(&stored));
          Ok(None)
        }
      }
      Operation::Update => {
        let patch = change
          .data
          .as_ref()
          .ok_or_else(|| eyre!("Update of {} {} without data", table, change.record_id))?;
        let stored = remote.update(table, &change.record_id, patch).await?;
        self.cascade(def, CacheChange::Upsert(&stored));
        Ok(None)
      }
      Operation::Delete => {
        remote.delete(table, &change.record_id).await?;
        self.cascade(def, CacheChange::Remove {
          id: &change.record_id,
        });
        Ok(None)
      }
      Operation::MarkAllRead => {
        let data = change
          .data
          .clone()
          .ok_or_else(|| eyre!("Bulk update of {} without data", table))?;
        let bulk: BulkUpdate =
          serde_json::from_value(data).map_err(|e| eyre!("Failed to decode bulk update: {}", e))?;
        let updated = remote.update_where(table, &bulk.filter, &bulk.patch).await?;
        debug!(table = %table, updated, "Bulk update applied");
        Ok(None)
      }
    }
  }

  /// Mirror a replayed change into the cache. The remote write already
  /// happened, so a cache failure must not fail the change.
  fn cascade(&self, def: Option<&'static EntityDef>, change: CacheChange<'_>) {
    let Some(def) = def else {
      return;
    };
    if let Err(e) = cascade::apply(&self.services.cache, def, change) {
      warn!(table = %def.table, error = %e, "Failed to update cache after replay");
    }
  }

  /// Rebuild the cache of every tracked entity from the remote store.
  async fn refresh(&self, report: &mut SyncReport) {
    let defs = TRACKED.iter().copied().filter(|def| {
      let skip = def.owner_field.is_some() && self.user_id.is_none();
      if skip {
        debug!(table = %def.table, "No user configured, skipping refresh");
      }
      !skip
    });

    // One concurrent refresh per table
    let results = join_all(defs.map(|def| async move { (def, self.refresh_entity(def).await) })).await;

    for (def, result) in results {
      match result {
        Ok(rows) => {
          debug!(table = %def.table, rows, "Cache refreshed");
          report.refreshed.push(def.table);
        }
        Err(e) => warn!(table = %def.table, error = %e, "Refresh failed, keeping cached data"),
      }
    }
  }

  /// Put changes still in the queue back on top of the refreshed cache, so
  /// retained records and edits stay visible until they replay.
  fn reapply_queued(&self) {
    let queued = match self.services.queue.drain() {
      Ok(queued) => queued,
      Err(e) => {
        warn!(error = %e, "Failed to read queue after refresh");
        return;
      }
    };
    if queued.is_empty() {
      return;
    }

    for def in TRACKED.iter().copied() {
      match cascade::reapply(&self.services.cache, def, &queued) {
        Ok(0) => {}
        Ok(applied) => debug!(table = %def.table, applied, "Reapplied queued changes"),
        Err(e) => warn!(table = %def.table, error = %e, "Failed to reapply queued changes"),
      }
    }
  }

  async fn refresh_entity(&self, def: &EntityDef) -> Result<usize> {
    let filter = match (def.owner_field, self.user_id.as_deref()) {
      (Some(field), Some(user_id)) => Filter::new().eq(field, user_id),
      _ => Filter::new(),
    };
    let rows = self.services.remote.list(def.table, &filter).await?;
    let cache = &self.services.cache;

    cache.write(&def.collection(), &rows)?;

    if let Some(scope) = &def.scope {
      let mut groups: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
      for row in &rows {
        if let Some(scope_id) = def.scope_id(row) {
          groups.entry(scope_id).or_default().push(row);
        }
      }

      for key in cache.keys_with_prefix(scope.key_prefix)? {
        let emptied = key
          .as_str()
          .strip_prefix(scope.key_prefix)
          .is_some_and(|scope_id| !groups.contains_key(scope_id));
        if emptied {
          cache.write(&key, &Vec::<Value>::new())?;
        }
      }
      for (scope_id, items) in &groups {
        if let Some(key) = def.scoped(scope_id) {
          cache.write(&key, items)?;
        }
      }
    }

    if let Some(prefix) = def.detail_prefix {
      let by_id: HashMap<&str, &Value> = rows
        .iter()
        .filter_map(|row| record_id(row).map(|id| (id, row)))
        .collect();
      for key in cache.keys_with_prefix(prefix)? {
        let Some(id) = key.as_str().strip_prefix(prefix) else {
          continue;
        };
        match by_id.get(id) {
          Some(row) => cache.write(&key, row)?,
          None => cache.remove(&key)?,
        }
      }
    }

    Ok(rows.len())
  }
}

/// Rewrite temporary ids resolved earlier in the pass.
fn remap_change(change: &mut PendingChange, remapped: &HashMap<String, String>) {
  if remapped.is_empty() {
    return;
  }
  if let Some(canonical) = remapped.get(&change.record_id) {
    change.record_id = canonical.clone();
  }
  if change.operation == Operation::MarkAllRead {
    return;
  }
  if let Some(fields) = change.data.as_mut().and_then(Value::as_object_mut) {
    for value in fields.values_mut() {
      if let Some(canonical) = value.as_str().and_then(|s| remapped.get(s)) {
        *value = Value::String(canonical.clone());
      }
    }
  }
}

fn references_any(data: Option<&Value>, ids: &HashSet<String>) -> bool {
  if ids.is_empty() {
    return false;
  }
  data
    .and_then(Value::as_object)
    .map(|fields| fields.values().any(|v| v.as_str().is_some_and(|s| ids.contains(s))))
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheKey;
  use crate::entity::{EntityAdapter, PENDING_THEME_KEY};
  use crate::models::{Project, Task};
  use crate::table::Table;
  use crate::testing::Harness;
  use serde_json::json;
  use std::time::Duration;

  fn engine(h: &Harness, max_retries: u32) -> SyncEngine {
    SyncEngine::new(h.services.clone(), Some("u1".to_string()), max_retries)
  }

  fn seed_tasks(h: &Harness) {
    for id in ["t1", "t2", "t3"] {
      h.remote.seed(Table::Tasks, json!({"id": id, "project_id": "p1", "title": id}));
    }
  }

  fn queue_renames(h: &Harness) {
    for (n, id) in ["t1", "t2", "t3"].iter().enumerate() {
      h.services
        .queue
        .enqueue(
          PendingChange::update(Table::Tasks, *id, json!({"title": "renamed"}))
            .with_created_at(1_000 + n as i64),
        )
        .unwrap();
    }
  }

  fn title(h: &Harness, id: &str) -> Value {
    h.remote
      .rows(Table::Tasks)
      .into_iter()
      .find(|row| row["id"] == id)
      .unwrap()["title"]
      .clone()
  }

  #[tokio::test]
  async fn test_failed_change_is_dropped_without_retries() {
    let h = Harness::online();
    seed_tasks(&h);
    queue_renames(&h);
    h.remote.fail_on("update:tasks:t2");

    let report = engine(&h, 0).sync().await.unwrap();

    assert!(h.services.queue.is_empty().unwrap());
    assert_eq!(report.applied, 2);
    assert_eq!(report.dropped, 1);
    assert_eq!(title(&h, "t1"), "renamed");
    assert_eq!(title(&h, "t2"), "t2");
    assert_eq!(title(&h, "t3"), "renamed");
  }

  #[tokio::test]
  async fn test_failed_change_is_retained_with_retry_count() {
    let h = Harness::online();
    seed_tasks(&h);
    queue_renames(&h);
    h.remote.fail_on("update:tasks:t2");

    let report = engine(&h, 3).sync().await.unwrap();

    let left = h.services.queue.drain().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].record_id, "t2");
    assert_eq!(left[0].retry_count, 1);
    assert!(left[0].last_error.is_some());
    assert_eq!(report.retained, 1);

    h.remote.recover();
    engine(&h, 3).sync().await.unwrap();
    assert!(h.services.queue.is_empty().unwrap());
    assert_eq!(title(&h, "t2"), "renamed");
  }

  #[tokio::test]
  async fn test_change_exhausting_retries_is_dropped() {
    let h = Harness::online();
    seed_tasks(&h);
    h.services
      .queue
      .enqueue(PendingChange::update(Table::Tasks, "t1", json!({"title": "x"})))
      .unwrap();
    h.remote.fail_on("update:tasks:t1");

    let engine = engine(&h, 1);
    engine.sync().await.unwrap();
    assert_eq!(h.services.queue.len().unwrap(), 1);
    let report = engine.sync().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert!(h.services.queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_later_changes_to_failed_record_wait() {
    let h = Harness::online();
    seed_tasks(&h);
    h.services
      .queue
      .enqueue(PendingChange::update(Table::Tasks, "t1", json!({"title": "a"})).with_created_at(1))
      .unwrap();
    h.services
      .queue
      .enqueue(PendingChange::update(Table::Tasks, "t1", json!({"title": "b"})).with_created_at(2))
      .unwrap();
    h.remote.fail_on("update:tasks:t1");

    engine(&h, 3).sync().await.unwrap();

    let left = h.services.queue.drain().unwrap();
    assert_eq!(left.len(), 2);
    assert_eq!(left[0].retry_count, 1);
    assert_eq!(left[1].retry_count, 0);
    assert_eq!(h.remote.count("update:tasks"), 1);
  }

  #[tokio::test]
  async fn test_offline_create_then_sync_swaps_in_canonical_id() {
    let h = Harness::offline();
    let tasks = EntityAdapter::<Task>::new(h.services.clone());

    let created = tasks.create(Task::new("p1", "X")).await.unwrap();
    assert_eq!(h.services.queue.len().unwrap(), 1);
    assert_eq!(tasks.cached(None).unwrap()[0].id, created.id);

    h.probe.set_online(true);
    let report = engine(&h, 3).sync().await.unwrap();

    assert_eq!(h.remote.count("insert:tasks"), 1);
    assert!(h.services.queue.is_empty().unwrap());
    let canonical = report.remapped.get(&created.id).unwrap();
    let cached = tasks.cached(None).unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(&cached[0].id, canonical);
    assert_eq!(cached[0].title, "X");
    assert!(!is_temp_id(&tasks.cached(Some("p1")).unwrap()[0].id));
  }

  #[tokio::test]
  async fn test_retained_insert_stays_cached_after_refresh() {
    let h = Harness::offline();
    let tasks = EntityAdapter::<Task>::new(h.services.clone());
    let created = tasks.create(Task::new("p1", "X")).await.unwrap();

    h.set_online(true);
    h.remote.fail_on("insert:tasks");
    let report = engine(&h, 3).sync().await.unwrap();

    assert_eq!(report.retained, 1);
    assert!(report.refreshed.contains(&Table::Tasks));
    assert_eq!(h.services.queue.len().unwrap(), 1);
    let cached = tasks.cached(None).unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, created.id);
    assert_eq!(tasks.cached(Some("p1")).unwrap()[0].id, created.id);
    assert_eq!(tasks.get(&created.id).await.unwrap().unwrap().title, "X");
  }

  #[tokio::test]
  async fn test_retained_update_keeps_local_value_after_refresh() {
    let h = Harness::online();
    seed_tasks(&h);
    queue_renames(&h);
    h.remote.fail_on("update:tasks:t2");

    engine(&h, 3).sync().await.unwrap();

    let tasks = EntityAdapter::<Task>::new(h.services.clone());
    let cached = tasks.cached(Some("p1")).unwrap();
    let t2 = cached.iter().find(|t| t.id == "t2").unwrap();
    assert_eq!(title(&h, "t2"), "t2");
    assert_eq!(t2.title, "renamed");
    assert!(cached.iter().all(|t| t.title == "renamed"));
  }

  #[tokio::test]
  async fn test_temp_ids_are_remapped_in_later_changes() {
    let h = Harness::offline();
    let projects = EntityAdapter::<Project>::new(h.services.clone());
    let tasks = EntityAdapter::<Task>::new(h.services.clone());

    let project = projects.create(Project::new("Launch")).await.unwrap();
    let task = tasks.create(Task::new(&project.id, "Plan")).await.unwrap();
    tasks.update(&task.id, json!({"title": "Plan it"})).await.unwrap();

    h.probe.set_online(true);
    let report = engine(&h, 3).sync().await.unwrap();

    assert_eq!(report.applied, 3);
    let project_id = report.remapped.get(&project.id).unwrap();
    let task_id = report.remapped.get(&task.id).unwrap();
    let row = h.remote.rows(Table::Tasks).pop().unwrap();
    assert_eq!(&row["project_id"], project_id.as_str());
    assert_eq!(&row["id"], task_id.as_str());
    assert_eq!(row["title"], "Plan it");
  }

  #[tokio::test]
  async fn test_pending_theme_is_applied_first() {
    let h = Harness::online();
    seed_tasks(&h);
    h.remote.seed(Table::Profiles, json!({"id": "u1", "theme": "light"}));
    h.services.kv.set(PENDING_THEME_KEY, "dark").unwrap();
    queue_renames(&h);

    let report = engine(&h, 3).sync().await.unwrap();

    assert!(report.theme_applied);
    assert_eq!(h.remote.calls()[0], "update:profiles:u1");
    assert_eq!(h.remote.rows(Table::Profiles)[0]["theme"], "dark");
    assert!(h.services.kv.get(PENDING_THEME_KEY).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_offline_sync_is_skipped() {
    let h = Harness::offline();
    queue_renames(&h);

    let report = engine(&h, 3).sync().await.unwrap();

    assert_eq!(report.skipped, Some(SkipReason::Offline));
    assert_eq!(h.services.queue.len().unwrap(), 3);
    assert_eq!(h.remote.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_empty_queue_is_nothing_to_sync() {
    let h = Harness::online();
    let report = engine(&h, 3).sync().await.unwrap();
    assert_eq!(report.skipped, Some(SkipReason::NothingToSync));
    assert_eq!(h.remote.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_overlapping_sync_runs_once() {
    let h = Harness::online();
    seed_tasks(&h);
    queue_renames(&h);
    h.remote.set_delay(Duration::from_millis(20));
    let engine = engine(&h, 3);

    let (first, second) = tokio::join!(engine.sync(), engine.sync());

    let reports = [first.unwrap(), second.unwrap()];
    let skipped: Vec<_> = reports.iter().filter_map(|r| r.skipped).collect();
    assert_eq!(skipped, vec![SkipReason::AlreadyRunning]);
    assert_eq!(h.remote.count("update:tasks"), 3);
  }

  #[tokio::test]
  async fn test_sync_publishes_flag_and_timestamp() {
    let h = Harness::online();
    seed_tasks(&h);
    queue_renames(&h);
    let engine = engine(&h, 3);

    engine.sync().await.unwrap();

    assert!(!engine.is_syncing().unwrap());
    assert!(engine.last_synced().unwrap().is_some());
  }

  #[tokio::test]
  async fn test_refresh_rebuilds_scoped_and_detail_keys() {
    let h = Harness::online();
    seed_tasks(&h);
    let cache = &h.services.cache;
    cache
      .write(&CacheKey::new("project_tasks_cache_gone"), &json!([{"id": "old", "project_id": "gone"}]))
      .unwrap();
    cache
      .write(&CacheKey::new("task_details_cache_t1"), &json!({"id": "t1", "title": "stale"}))
      .unwrap();
    cache
      .write(&CacheKey::new("task_details_cache_old"), &json!({"id": "old"}))
      .unwrap();
    queue_renames(&h);

    let report = engine(&h, 3).sync().await.unwrap();

    assert!(report.refreshed.contains(&Table::Tasks));
    let scoped = cache.peek::<Value>(&CacheKey::new("project_tasks_cache_p1")).unwrap().unwrap();
    assert_eq!(scoped.data.as_array().unwrap().len(), 3);
    let gone = cache.peek::<Value>(&CacheKey::new("project_tasks_cache_gone")).unwrap().unwrap();
    assert_eq!(gone.data, json!([]));
    let detail = cache.peek::<Value>(&CacheKey::new("task_details_cache_t1")).unwrap().unwrap();
    assert_eq!(detail.data["title"], "renamed");
    assert!(cache.peek::<Value>(&CacheKey::new("task_details_cache_old")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_failed_refresh_of_one_table_is_skipped() {
    let h = Harness::online();
    seed_tasks(&h);
    queue_renames(&h);
    h.remote.fail_on("list:phases");

    let report = engine(&h, 3).sync().await.unwrap();

    assert!(!report.refreshed.contains(&Table::Phases));
    assert!(report.refreshed.contains(&Table::Tasks));
  }
}
