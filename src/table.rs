//! Logical tables of the remote store.

use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
  Projects,
  Tasks,
  Subtasks,
  Comments,
  Phases,
  TeamMembers,
  TimeEntries,
  WorkflowAutomations,
  ProjectTemplates,
  Notifications,
  Profiles,
}

impl Table {
  pub const ALL: [Table; 11] = [
    Table::Projects,
    Table::Tasks,
    Table::Subtasks,
    Table::Comments,
    Table::Phases,
    Table::TeamMembers,
    Table::TimeEntries,
    Table::WorkflowAutomations,
    Table::ProjectTemplates,
    Table::Notifications,
    Table::Profiles,
  ];

  /// Name of the table on the remote store.
  pub fn as_str(&self) -> &'static str {
    match self {
      Table::Projects => "projects",
      Table::Tasks => "tasks",
      Table::Subtasks => "subtasks",
      Table::Comments => "comments",
      Table::Phases => "phases",
      Table::TeamMembers => "team_members",
      Table::TimeEntries => "time_entries",
      Table::WorkflowAutomations => "workflow_automations",
      Table::ProjectTemplates => "project_templates",
      Table::Notifications => "notifications",
      Table::Profiles => "profiles",
    }
  }
}

impl fmt::Display for Table {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Table {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Table::ALL
      .iter()
      .copied()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| eyre!("Unknown table: {}", s))
  }
}
