//! Entity records owned by the backend.

mod notification;
mod phase;
mod project;
mod task;
mod team;
mod template;
mod time_entry;
mod workflow;

use serde::{de::DeserializeOwned, Serialize};

use crate::entity::EntityDef;

pub use notification::Notification;
pub use phase::Phase;
pub use project::Project;
pub use task::{Comment, Subtask, Task};
pub use team::TeamMember;
pub use template::ProjectTemplate;
pub use time_entry::TimeEntry;
pub use workflow::WorkflowAutomation;

/// A record type that can be cached and queued.
///
/// Implementors point at the static definition describing their table and
/// cache keys.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  fn def() -> &'static EntityDef;

  fn id(&self) -> &str;

  fn set_id(&mut self, id: String);
}
