//! Facade wiring storage, remote and probe into one client.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::connectivity::{ConnectivityProbe, HttpProbe};
use crate::entity::progress::{phase_progress, project_progress};
use crate::entity::{EntityAdapter, Preferences, Services};
use crate::kv::{KeyValueStore, SqliteStore};
use crate::models::{
  Comment, Notification, Phase, Project, ProjectTemplate, Subtask, Task, TeamMember, TimeEntry,
  WorkflowAutomation,
};
use crate::queue::PendingChange;
use crate::remote::{RemoteStore, RestRemote};
use crate::sync::{SyncEngine, SyncReport};

/// Tunables that do not depend on where data lives.
#[derive(Debug, Clone)]
pub struct ClientOptions {
  pub user_id: Option<String>,
  pub stale_time: chrono::Duration,
  pub max_retries: u32,
}

impl Default for ClientOptions {
  fn default() -> Self {
    Self {
      user_id: None,
      stale_time: chrono::Duration::minutes(5),
      max_retries: 3,
    }
  }
}

impl ClientOptions {
  pub fn from_config(config: &Config) -> Self {
    Self {
      user_id: config.user_id.clone(),
      stale_time: config.stale_time(),
      max_retries: config.sync.max_retries,
    }
  }
}

/// Snapshot of local sync state.
#[derive(Debug, Clone)]
pub struct Status {
  pub online: bool,
  pub pending_changes: usize,
  pub is_syncing: bool,
  pub last_synced: Option<DateTime<Utc>>,
  pub pending_theme: Option<String>,
}

/// Local-first client for the project-management backend.
pub struct PlanClient {
  services: Arc<Services>,
  pub projects: EntityAdapter<Project>,
  pub tasks: EntityAdapter<Task>,
  pub subtasks: EntityAdapter<Subtask>,
  pub comments: EntityAdapter<Comment>,
  pub phases: EntityAdapter<Phase>,
  pub team_members: EntityAdapter<TeamMember>,
  pub time_entries: EntityAdapter<TimeEntry>,
  pub automations: EntityAdapter<WorkflowAutomation>,
  pub templates: EntityAdapter<ProjectTemplate>,
  pub notifications: EntityAdapter<Notification>,
  pub preferences: Preferences,
  sync: SyncEngine,
  user_id: Option<String>,
}

impl PlanClient {
  /// Build a client from configuration, probing the backend for connectivity.
  pub fn new(config: &Config) -> Result<Self> {
    let probe = Arc::new(HttpProbe::new(config)?);
    Self::with_probe(config, probe)
  }

  /// Build a client from configuration with a custom connectivity probe.
  pub fn with_probe(config: &Config, probe: Arc<dyn ConnectivityProbe>) -> Result<Self> {
    let kv = Arc::new(SqliteStore::open(&config.store_path()?)?);
    let remote = Arc::new(RestRemote::new(config)?);
    Ok(Self::from_parts(kv, remote, probe, ClientOptions::from_config(config)))
  }

  pub fn from_parts(
    kv: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteStore>,
    probe: Arc<dyn ConnectivityProbe>,
    options: ClientOptions,
  ) -> Self {
    let services = Arc::new(Services::new(kv, remote, probe).with_stale_time(options.stale_time));

    Self {
      projects: EntityAdapter::new(Arc::clone(&services)),
      tasks: EntityAdapter::new(Arc::clone(&services)),
      subtasks: EntityAdapter::new(Arc::clone(&services)),
      comments: EntityAdapter::new(Arc::clone(&services)),
      phases: EntityAdapter::new(Arc::clone(&services)),
      team_members: EntityAdapter::new(Arc::clone(&services)),
      time_entries: EntityAdapter::new(Arc::clone(&services)),
      automations: EntityAdapter::new(Arc::clone(&services)),
      templates: EntityAdapter::new(Arc::clone(&services)),
      notifications: EntityAdapter::new(Arc::clone(&services)),
      preferences: Preferences::new(Arc::clone(&services), options.user_id.clone()),
      sync: SyncEngine::new(Arc::clone(&services), options.user_id.clone(), options.max_retries),
      user_id: options.user_id,
      services,
    }
  }

  pub fn user_id(&self) -> Option<&str> {
    self.user_id.as_deref()
  }

  pub async fn is_online(&self) -> bool {
    self.services.is_online().await
  }

  /// Create a task and refresh the progress of its phase and project.
  pub async fn create_task(&self, task: Task) -> Result<Task> {
    let created = self.tasks.create(task).await?;
    if let Some(phase_id) = &created.phase_id {
      self.recompute_progress(&created.project_id, phase_id).await?;
    }
    Ok(created)
  }

  /// Update a task and refresh progress of every phase it touched.
  pub async fn update_task(&self, id: &str, patch: Value) -> Result<Option<Task>> {
    let before = self.tasks.get(id).await?;
    let updated = self.tasks.update(id, patch).await?;

    let old_phase = before.as_ref().and_then(|t| Some((t.project_id.clone(), t.phase_id.clone()?)));
    let new_phase = updated.as_ref().and_then(|t| Some((t.project_id.clone(), t.phase_id.clone()?)));

    if let Some((project_id, phase_id)) = &new_phase {
      self.recompute_progress(project_id, phase_id).await?;
    }
    if let Some((project_id, phase_id)) = &old_phase {
      if old_phase != new_phase {
        self.recompute_progress(project_id, phase_id).await?;
      }
    }
    Ok(updated)
  }

  /// Delete a task and refresh the progress of the phase it belonged to.
  pub async fn delete_task(&self, id: &str) -> Result<()> {
    let before = self.tasks.get(id).await?;
    self.tasks.delete(id).await?;
    if let Some(task) = before {
      if let Some(phase_id) = &task.phase_id {
        self.recompute_progress(&task.project_id, phase_id).await?;
      }
    }
    Ok(())
  }

  async fn recompute_progress(&self, project_id: &str, phase_id: &str) -> Result<()> {
    self.recompute_phase_progress(project_id, phase_id).await?;
    self.recompute_project_progress(project_id).await?;
    Ok(())
  }

  /// Recompute and store the progress of one phase from its tasks.
  pub async fn recompute_phase_progress(&self, project_id: &str, phase_id: &str) -> Result<i32> {
    let tasks: Vec<Task> = self
      .tasks
      .list_in(project_id)
      .await?
      .into_iter()
      .filter(|t| t.phase_id.as_deref() == Some(phase_id))
      .collect();
    let progress = phase_progress(&tasks);

    debug!(phase_id, progress, tasks = tasks.len(), "Phase progress recomputed");
    self.phases.update(phase_id, json!({ "progress": progress })).await?;
    Ok(progress)
  }

  /// Recompute and store the progress of a project from its phases.
  pub async fn recompute_project_progress(&self, project_id: &str) -> Result<i32> {
    let phases = self.phases.list_in(project_id).await?;
    let progress = project_progress(&phases);

    debug!(project_id, progress, phases = phases.len(), "Project progress recomputed");
    self.projects.update(project_id, json!({ "progress": progress })).await?;
    Ok(progress)
  }

  /// Mark every notification of the configured user as read.
  pub async fn mark_all_notifications_read(&self) -> Result<()> {
    let user_id = self
      .user_id
      .as_deref()
      .ok_or_else(|| eyre!("No user configured, set user_id in the config file"))?;
    self.notifications.mark_all_read(user_id).await
  }

  /// Notifications of the configured user.
  pub async fn my_notifications(&self) -> Result<Vec<Notification>> {
    match &self.user_id {
      Some(user_id) => self.notifications.list_for_owner(user_id).await,
      None => Ok(Vec::new()),
    }
  }

  pub async fn set_theme(&self, theme: &str) -> Result<()> {
    self.preferences.set_theme(theme).await
  }

  /// Replay queued changes and refresh the cache.
  pub async fn sync(&self) -> Result<SyncReport> {
    self.sync.sync().await
  }

  /// Queued changes in replay order.
  pub fn pending_changes(&self) -> Result<Vec<PendingChange>> {
    self.services.queue.drain()
  }

  /// Drop every queued change without replaying it.
  pub fn discard_pending_changes(&self) -> Result<()> {
    self.services.queue.clear()
  }

  pub async fn status(&self) -> Result<Status> {
    let last_synced = self
      .sync
      .last_synced()?
      .and_then(|millis| Utc.timestamp_millis_opt(millis).single());

    Ok(Status {
      online: self.is_online().await,
      pending_changes: self.services.queue.len()?,
      is_syncing: self.sync.is_syncing()?,
      last_synced,
      pending_theme: self.preferences.pending_theme()?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheKey;
  use crate::connectivity::StaticProbe;
  use crate::kv::MemoryStore;
  use crate::table::Table;
  use crate::testing::MockRemote;

  struct Fixture {
    client: PlanClient,
    remote: Arc<MockRemote>,
    probe: Arc<StaticProbe>,
  }

  fn fixture(online: bool) -> Fixture {
    let remote = Arc::new(MockRemote::new());
    let probe = Arc::new(StaticProbe::new(online));
    let options = ClientOptions {
      user_id: Some("u1".to_string()),
      ..Default::default()
    };
    let client = PlanClient::from_parts(
      Arc::new(MemoryStore::new()),
      remote.clone(),
      probe.clone(),
      options,
    );
    Fixture {
      client,
      remote,
      probe,
    }
  }

  fn seed_project(remote: &MockRemote) {
    remote.seed(Table::Projects, json!({"id": "p1", "name": "Launch", "progress": 0}));
    remote.seed(
      Table::Phases,
      json!({"id": "ph1", "project_id": "p1", "name": "Design", "weight": 50.0, "progress": 75}),
    );
    remote.seed(
      Table::Phases,
      json!({"id": "ph2", "project_id": "p1", "name": "Build", "weight": 50.0, "progress": 0}),
    );
    for id in ["t1", "t2", "t3"] {
      remote.seed(
        Table::Tasks,
        json!({"id": id, "project_id": "p1", "phase_id": "ph2", "title": id, "status": "todo"}),
      );
    }
  }

  fn remote_row(remote: &MockRemote, table: Table, id: &str) -> Value {
    remote
      .rows(table)
      .into_iter()
      .find(|row| row["id"] == id)
      .unwrap()
  }

  #[tokio::test]
  async fn test_create_task_rolls_progress_up_to_project() {
    let f = fixture(true);
    seed_project(&f.remote);

    let task = Task {
      status: "done".to_string(),
      ..Task::new("p1", "Ship").in_phase("ph2")
    };
    f.client.create_task(task).await.unwrap();

    assert_eq!(remote_row(&f.remote, Table::Phases, "ph2")["progress"], 25);
    assert_eq!(remote_row(&f.remote, Table::Projects, "p1")["progress"], 50);
  }

  #[tokio::test]
  async fn test_moving_task_between_phases_updates_both() {
    let f = fixture(true);
    seed_project(&f.remote);
    f.remote.seed(
      Table::Tasks,
      json!({"id": "t4", "project_id": "p1", "phase_id": "ph1", "title": "t4", "status": "done"}),
    );

    f.client
      .update_task("t4", json!({"phase_id": "ph2"}))
      .await
      .unwrap();

    assert_eq!(remote_row(&f.remote, Table::Phases, "ph1")["progress"], 0);
    assert_eq!(remote_row(&f.remote, Table::Phases, "ph2")["progress"], 25);
  }

  #[tokio::test]
  async fn test_offline_task_edit_recomputes_from_cache() {
    let f = fixture(true);
    seed_project(&f.remote);
    f.client.tasks.list_in("p1").await.unwrap();
    f.client.phases.list_in("p1").await.unwrap();
    f.client.projects.get("p1").await.unwrap();

    f.probe.set_online(false);
    f.client
      .update_task("t1", json!({"status": "done"}))
      .await
      .unwrap();

    let phases = f.client.phases.cached(Some("p1")).unwrap();
    let ph2 = phases.iter().find(|p| p.id == "ph2").unwrap();
    assert_eq!(ph2.progress, 33);
    let project = f.client.projects.get("p1").await.unwrap().unwrap();
    assert_eq!(project.progress, 54);
    // task update, phase progress, project progress
    assert_eq!(f.client.pending_changes().unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_progress_of_unsynced_project_survives_reconnect() {
    let f = fixture(false);
    let project = f.client.projects.create(Project::new("Draft")).await.unwrap();
    let phase = f
      .client
      .phases
      .create(Phase::new(project.id.as_str(), "Plan", 100.0))
      .await
      .unwrap();
    let task = Task {
      status: "done".to_string(),
      ..Task::new(project.id.as_str(), "Outline").in_phase(phase.id.as_str())
    };
    f.client.create_task(task).await.unwrap();

    f.probe.set_online(true);
    let progress = f
      .client
      .recompute_phase_progress(&project.id, &phase.id)
      .await
      .unwrap();

    assert_eq!(progress, 100);
    assert_eq!(f.remote.count("list:tasks"), 0);
    let cached = f.client.phases.cached(Some(&project.id)).unwrap();
    assert_eq!(cached[0].progress, 100);
  }

  #[tokio::test]
  async fn test_status_reports_queue_and_sync_time() {
    let f = fixture(false);
    f.client.projects.create(Project::new("Offline")).await.unwrap();

    let status = f.client.status().await.unwrap();
    assert!(!status.online);
    assert_eq!(status.pending_changes, 1);
    assert!(status.last_synced.is_none());

    f.probe.set_online(true);
    f.client.sync().await.unwrap();

    let status = f.client.status().await.unwrap();
    assert_eq!(status.pending_changes, 0);
    assert!(status.last_synced.is_some());
    assert!(!status.is_syncing);
  }

  #[tokio::test]
  async fn test_mark_all_notifications_read_uses_configured_user() {
    let f = fixture(false);
    f.client
      .services
      .cache
      .write(
        &CacheKey::new("notifications_cache"),
        &json!([{"id": "n1", "user_id": "u1", "title": "hi", "read": false}]),
      )
      .unwrap();

    f.client.mark_all_notifications_read().await.unwrap();

    assert!(f.client.my_notifications().await.unwrap()[0].read);
    assert_eq!(f.client.pending_changes().unwrap().len(), 1);
  }
}
