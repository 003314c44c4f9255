//! Static description of how each entity maps onto cache keys.

use serde_json::Value;

use crate::cache::CacheKey;
use crate::table::Table;

/// Parent relation that partitions a collection into per-parent lists,
/// e.g. tasks by `project_id` under `project_tasks_cache_<projectId>`.
#[derive(Debug)]
pub struct Scope {
  pub field: &'static str,
  pub key_prefix: &'static str,
}

/// Cache layout of one entity type.
///
/// Together the keys form the dependency graph touched by a mutation: the
/// global collection, the scoped collection of the record's parent, and the
/// record's detail entry.
#[derive(Debug)]
pub struct EntityDef {
  pub table: Table,
  pub collection_key: &'static str,
  pub scope: Option<Scope>,
  pub detail_prefix: Option<&'static str>,
  /// Field restricting full refreshes to the signed-in user.
  pub owner_field: Option<&'static str>,
}

impl EntityDef {
  pub fn collection(&self) -> CacheKey {
    CacheKey::new(self.collection_key)
  }

  pub fn scoped(&self, scope_id: &str) -> Option<CacheKey> {
    self
      .scope
      .as_ref()
      .map(|scope| CacheKey::new(format!("{}{}", scope.key_prefix, scope_id)))
  }

  pub fn detail(&self, id: &str) -> Option<CacheKey> {
    self
      .detail_prefix
      .map(|prefix| CacheKey::new(format!("{}{}", prefix, id)))
  }

  /// Parent id of a JSON record, when this entity is scoped.
  pub fn scope_id<'a>(&self, record: &'a Value) -> Option<&'a str> {
    let scope = self.scope.as_ref()?;
    record.get(scope.field).and_then(Value::as_str)
  }
}

pub static PROJECTS: EntityDef = EntityDef {
  table: Table::Projects,
  collection_key: "projects_cache",
  scope: None,
  detail_prefix: Some("project_details_cache_"),
  owner_field: None,
};

pub static TASKS: EntityDef = EntityDef {
  table: Table::Tasks,
  collection_key: "tasks_cache",
  scope: Some(Scope {
    field: "project_id",
    key_prefix: "project_tasks_cache_",
  }),
  detail_prefix: Some("task_details_cache_"),
  owner_field: None,
};

pub static SUBTASKS: EntityDef = EntityDef {
  table: Table::Subtasks,
  collection_key: "subtasks_cache",
  scope: Some(Scope {
    field: "task_id",
    key_prefix: "task_subtasks_cache_",
  }),
  detail_prefix: None,
  owner_field: None,
};

pub static COMMENTS: EntityDef = EntityDef {
  table: Table::Comments,
  collection_key: "comments_cache",
  scope: Some(Scope {
    field: "task_id",
    key_prefix: "task_comments_cache_",
  }),
  detail_prefix: None,
  owner_field: None,
};

pub static PHASES: EntityDef = EntityDef {
  table: Table::Phases,
  collection_key: "phases_cache",
  scope: Some(Scope {
    field: "project_id",
    key_prefix: "project_phases_cache_",
  }),
  detail_prefix: Some("phase_details_cache_"),
  owner_field: None,
};

pub static TEAM_MEMBERS: EntityDef = EntityDef {
  table: Table::TeamMembers,
  collection_key: "team_members_cache",
  scope: Some(Scope {
    field: "project_id",
    key_prefix: "project_team_members_cache_",
  }),
  detail_prefix: None,
  owner_field: None,
};

pub static TIME_ENTRIES: EntityDef = EntityDef {
  table: Table::TimeEntries,
  collection_key: "time_entries_cache",
  scope: Some(Scope {
    field: "task_id",
    key_prefix: "task_time_entries_cache_",
  }),
  detail_prefix: None,
  owner_field: None,
};

pub static WORKFLOW_AUTOMATIONS: EntityDef = EntityDef {
  table: Table::WorkflowAutomations,
  collection_key: "workflow_automations_cache",
  scope: Some(Scope {
    field: "project_id",
    key_prefix: "project_workflow_automations_cache_",
  }),
  detail_prefix: None,
  owner_field: None,
};

pub static PROJECT_TEMPLATES: EntityDef = EntityDef {
  table: Table::ProjectTemplates,
  collection_key: "project_templates_cache",
  scope: None,
  detail_prefix: None,
  owner_field: None,
};

pub static NOTIFICATIONS: EntityDef = EntityDef {
  table: Table::Notifications,
  collection_key: "notifications_cache",
  scope: None,
  detail_prefix: None,
  owner_field: Some("user_id"),
};

/// Entities refreshed by a full sync.
pub static TRACKED: [&EntityDef; 10] = [
  &PROJECTS,
  &TASKS,
  &SUBTASKS,
  &COMMENTS,
  &PHASES,
  &TEAM_MEMBERS,
  &TIME_ENTRIES,
  &WORKFLOW_AUTOMATIONS,
  &PROJECT_TEMPLATES,
  &NOTIFICATIONS,
];

/// Definition for a table, if it holds cached entities.
pub fn for_table(table: Table) -> Option<&'static EntityDef> {
  TRACKED.iter().copied().find(|def| def.table == table)
}
