use serde::{Deserialize, Serialize};

use super::Record;
use crate::entity::{self, EntityDef};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Notification {
  #[serde(default)]
  pub id: String,
  pub user_id: String,
  pub title: String,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub read: bool,
  #[serde(default)]
  pub created_at: Option<String>,
}

impl Record for Notification {
  fn def() -> &'static EntityDef {
    &entity::NOTIFICATIONS
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }
}
