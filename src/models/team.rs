use serde::{Deserialize, Serialize};

use super::Record;
use crate::entity::{self, EntityDef};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TeamMember {
  #[serde(default)]
  pub id: String,
  pub project_id: String,
  pub user_id: String,
  #[serde(default = "default_role")]
  pub role: String,
  #[serde(default)]
  pub name: Option<String>,
}

fn default_role() -> String {
  "member".to_string()
}

impl Record for TeamMember {
  fn def() -> &'static EntityDef {
    &entity::TEAM_MEMBERS
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }
}
