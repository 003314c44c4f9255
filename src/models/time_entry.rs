use serde::{Deserialize, Serialize};

use super::Record;
use crate::entity::{self, EntityDef};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeEntry {
  #[serde(default)]
  pub id: String,
  pub task_id: String,
  #[serde(default)]
  pub project_id: Option<String>,
  #[serde(default)]
  pub user_id: Option<String>,
  pub started_at: String,
  /// Unset while the timer is running
  #[serde(default)]
  pub ended_at: Option<String>,
  #[serde(default)]
  pub duration_minutes: Option<i64>,
  #[serde(default)]
  pub note: Option<String>,
}

impl TimeEntry {
  pub fn is_running(&self) -> bool {
    self.ended_at.is_none()
  }
}

impl Record for TimeEntry {
  fn def() -> &'static EntityDef {
    &entity::TIME_ENTRIES
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }
}
