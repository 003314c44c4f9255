use serde::{Deserialize, Serialize};

use super::Record;
use crate::entity::{self, EntityDef};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Phase {
  #[serde(default)]
  pub id: String,
  pub project_id: String,
  pub name: String,
  #[serde(default)]
  pub order_index: i32,
  /// Share of the project this phase accounts for
  #[serde(default)]
  pub weight: f64,
  /// Completion percentage derived from the phase's tasks
  #[serde(default)]
  pub progress: i32,
  #[serde(default)]
  pub status: Option<String>,
}

impl Phase {
  pub fn new(project_id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
    Self {
      project_id: project_id.into(),
      name: name.into(),
      weight,
      ..Default::default()
    }
  }
}

impl Record for Phase {
  fn def() -> &'static EntityDef {
    &entity::PHASES
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }
}
