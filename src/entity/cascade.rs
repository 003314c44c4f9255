//! Single dispatch point for cache updates caused by a record mutation.
//!
//! A record can live under several keys at once (global collection, the
//! collection of its parent, its detail entry). Every mutation goes through
//! [`apply`] so those copies stay consistent without a refetch.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::debug;

use super::EntityDef;
use crate::cache::{merge_object, record_id, CacheKey, CacheStore};
use crate::queue::{BulkUpdate, Operation, PendingChange};
use crate::remote::Filter;

/// A change to the cached copies of one record.
#[derive(Debug, Clone, Copy)]
pub enum CacheChange<'a> {
  /// A complete record, newly created or freshly observed.
  Upsert(&'a Value),
  /// A partial update of the record with `id`.
  Patch { id: &'a str, partial: &'a Value },
  Remove { id: &'a str },
  /// The same partial update for every cached record matching `filter`.
  PatchWhere { filter: &'a Filter, partial: &'a Value },
  /// The record formerly known as `old_id` now has the id in `record`.
  Rekey { old_id: &'a str, record: &'a Value },
}

/// Apply `change` to every cache key of `def` it affects.
///
/// Returns the resulting record when known (`None` after a removal, or when
/// patching a record that is not cached anywhere).
pub fn apply(cache: &CacheStore, def: &EntityDef, change: CacheChange<'_>) -> Result<Option<Value>> {
  match change {
    CacheChange::Upsert(record) => {
      upsert(cache, def, record)?;
      Ok(Some(record.clone()))
    }
    CacheChange::Patch { id, partial } => {
      let Some(mut record) = find(cache, def, id)? else {
        debug!(table = %def.table, id, "Patched record not cached");
        return Ok(None);
      };
      merge_object(&mut record, partial);
      upsert(cache, def, &record)?;
      Ok(Some(record))
    }
    CacheChange::Remove { id } => {
      remove(cache, def, id)?;
      Ok(None)
    }
    CacheChange::PatchWhere { filter, partial } => {
      patch_where(cache, def, filter, partial)?;
      Ok(None)
    }
    CacheChange::Rekey { old_id, record } => {
      // Swap in place first so the record keeps its position in each list
      for key in collection_keys(cache, def)? {
        cache.replace_item_id(&key, old_id, record)?;
      }
      if let Some(key) = def.detail(old_id) {
        cache.remove(&key)?;
      }
      upsert(cache, def, record)?;
      Ok(Some(record.clone()))
    }
  }
}

/// Re-apply the local effect of queued changes to `def`'s cache keys.
///
/// Remote reads overwrite cache entries wholesale, which would hide records
/// and edits still waiting in the queue. Returns how many changes applied.
pub fn reapply(cache: &CacheStore, def: &EntityDef, changes: &[PendingChange]) -> Result<usize> {
  let mut applied = 0;
  for change in changes.iter().filter(|change| change.table_name == def.table) {
    let id = change.record_id.as_str();
    match (change.operation, change.data.as_ref()) {
      (Operation::Insert, Some(record)) => {
        apply(cache, def, CacheChange::Upsert(record))?;
      }
      (Operation::Update, Some(partial)) => {
        apply(cache, def, CacheChange::Patch { id, partial })?;
      }
      (Operation::Delete, _) => {
        apply(cache, def, CacheChange::Remove { id })?;
      }
      (Operation::MarkAllRead, Some(data)) => {
        let bulk: BulkUpdate = serde_json::from_value(data.clone())
          .map_err(|e| eyre!("Failed to decode bulk update: {}", e))?;
        apply(cache, def, CacheChange::PatchWhere {
          filter: &bulk.filter,
          partial: &bulk.patch,
        })?;
      }
      (operation, None) => {
        debug!(table = %def.table, id, operation = %operation, "Queued change without data");
        continue;
      }
    }
    applied += 1;
  }
  Ok(applied)
}

/// Locate the cached copy of a record: detail entry first, then collections.
pub fn find(cache: &CacheStore, def: &EntityDef, id: &str) -> Result<Option<Value>> {
  if let Some(key) = def.detail(id) {
    if let Some(entry) = cache.peek::<Value>(&key)? {
      if entry.data.is_object() {
        return Ok(Some(entry.data));
      }
    }
  }

  for key in collection_keys(cache, def)? {
    if let Some(entry) = cache.peek::<Value>(&key)? {
      let found = entry
        .data
        .as_array()
        .and_then(|items| items.iter().find(|item| record_id(item) == Some(id)));
      if let Some(record) = found {
        return Ok(Some(record.clone()));
      }
    }
  }

  Ok(None)
}

/// The global collection followed by every cached scoped collection.
fn collection_keys(cache: &CacheStore, def: &EntityDef) -> Result<Vec<CacheKey>> {
  let mut keys = vec![def.collection()];
  if let Some(scope) = &def.scope {
    keys.extend(cache.keys_with_prefix(scope.key_prefix)?);
  }
  Ok(keys)
}

fn upsert(cache: &CacheStore, def: &EntityDef, record: &Value) -> Result<()> {
  let id = record_id(record).ok_or_else(|| eyre!("Cannot cache {} record without id", def.table))?;
  let target = def.scope_id(record).and_then(|scope_id| def.scoped(scope_id));

  // Drop copies left in other parents' lists when the record moved
  if let Some(scope) = &def.scope {
    for key in cache.keys_with_prefix(scope.key_prefix)? {
      if Some(&key) != target.as_ref() {
        cache.remove_item(&key, id)?;
      }
    }
  }

  cache.upsert_item(&def.collection(), record)?;
  if let Some(key) = &target {
    cache.upsert_item(key, record)?;
  }
  if let Some(key) = def.detail(id) {
    cache.write(&key, record)?;
  }
  Ok(())
}

fn patch_where(cache: &CacheStore, def: &EntityDef, filter: &Filter, partial: &Value) -> Result<()> {
  let mut matched = Vec::new();
  for key in collection_keys(cache, def)? {
    let Some(mut entry) = cache.peek::<Value>(&key)? else {
      continue;
    };
    let Some(items) = entry.data.as_array_mut() else {
      continue;
    };
    let mut changed = false;
    for item in items.iter_mut().filter(|item| filter.matches(item)) {
      merge_object(item, partial);
      if let Some(id) = record_id(item) {
        matched.push(id.to_string());
      }
      changed = true;
    }
    if changed {
      cache.write_entry(&key, &entry)?;
    }
  }

  for id in &matched {
    if let Some(key) = def.detail(id) {
      cache.patch(&key, partial)?;
    }
  }
  debug!(table = %def.table, matched = matched.len(), "Patched matching records");
  Ok(())
}

fn remove(cache: &CacheStore, def: &EntityDef, id: &str) -> Result<()> {
  for key in collection_keys(cache, def)? {
    cache.remove_item(&key, id)?;
  }
  if let Some(key) = def.detail(id) {
    cache.remove(&key)?;
  }
  Ok(())
}
