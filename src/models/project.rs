use serde::{Deserialize, Serialize};

use super::Record;
use crate::entity::{self, EntityDef};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Project {
  #[serde(default)]
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default = "default_status")]
  pub status: String,
  /// Completion percentage derived from weighted phase progress
  #[serde(default)]
  pub progress: i32,
  #[serde(default)]
  pub owner_id: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

fn default_status() -> String {
  "active".to_string()
}

impl Project {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      status: default_status(),
      ..Default::default()
    }
  }
}

impl Record for Project {
  fn def() -> &'static EntityDef {
    &entity::PROJECTS
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }
}
