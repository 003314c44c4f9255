use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Record;
use crate::entity::{self, EntityDef};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectTemplate {
  #[serde(default)]
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  /// Phase blueprints, stored as the backend returns them
  #[serde(default)]
  pub phases: Value,
}

impl Record for ProjectTemplate {
  fn def() -> &'static EntityDef {
    &entity::PROJECT_TEMPLATES
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }
}
