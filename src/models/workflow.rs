use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Record;
use crate::entity::{self, EntityDef};

/// Rule that runs an action when a trigger fires within a project.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowAutomation {
  #[serde(default)]
  pub id: String,
  pub project_id: String,
  pub name: String,
  pub trigger: String,
  pub action: String,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  #[serde(default)]
  pub config: Value,
}

fn default_enabled() -> bool {
  true
}

impl Record for WorkflowAutomation {
  fn def() -> &'static EntityDef {
    &entity::WORKFLOW_AUTOMATIONS
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }
}
