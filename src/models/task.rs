use serde::{Deserialize, Serialize};

use super::Record;
use crate::entity::{self, EntityDef};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Task {
  #[serde(default)]
  pub id: String,
  pub project_id: String,
  #[serde(default)]
  pub phase_id: Option<String>,
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default = "default_status")]
  pub status: String,
  #[serde(default)]
  pub priority: Option<String>,
  #[serde(default)]
  pub assignee_id: Option<String>,
  #[serde(default)]
  pub due_date: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

fn default_status() -> String {
  "todo".to_string()
}

impl Task {
  pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
    Self {
      project_id: project_id.into(),
      title: title.into(),
      status: default_status(),
      ..Default::default()
    }
  }

  pub fn in_phase(mut self, phase_id: impl Into<String>) -> Self {
    self.phase_id = Some(phase_id.into());
    self
  }

  pub fn is_done(&self) -> bool {
    matches!(self.status.as_str(), "done" | "completed")
  }
}

impl Record for Task {
  fn def() -> &'static EntityDef {
    &entity::TASKS
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Subtask {
  #[serde(default)]
  pub id: String,
  pub task_id: String,
  pub title: String,
  #[serde(default)]
  pub completed: bool,
}

impl Record for Subtask {
  fn def() -> &'static EntityDef {
    &entity::SUBTASKS
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Comment {
  #[serde(default)]
  pub id: String,
  pub task_id: String,
  #[serde(default)]
  pub user_id: Option<String>,
  pub content: String,
  #[serde(default)]
  pub created_at: Option<String>,
}

impl Record for Comment {
  fn def() -> &'static EntityDef {
    &entity::COMMENTS
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }
}
