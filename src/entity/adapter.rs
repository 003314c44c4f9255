//! Generic cache-first adapter for one record type.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use super::cascade::{self, CacheChange};
use super::{is_temp_id, references_temp, temp_id, EntityDef, Services};
use crate::cache::{record_id, CacheKey, CacheRead, CacheSource};
use crate::models::Record;
use crate::queue::PendingChange;
use crate::remote::Filter;

/// Cache-first reads and offline-capable writes for records of type `T`.
///
/// Reads consult the cache and only go to the network when online and the
/// entry is stale or missing. Writes go straight to the backend when online;
/// offline they are applied to the cache and queued for the next sync.
pub struct EntityAdapter<T: Record> {
  services: Arc<Services>,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for EntityAdapter<T> {
  fn clone(&self) -> Self {
    Self {
      services: Arc::clone(&self.services),
      _marker: PhantomData,
    }
  }
}

impl<T: Record> EntityAdapter<T> {
  pub fn new(services: Arc<Services>) -> Self {
    Self {
      services,
      _marker: PhantomData,
    }
  }

  pub(crate) fn services(&self) -> &Services {
    &self.services
  }

  fn def(&self) -> &'static EntityDef {
    T::def()
  }

  fn decode(&self, value: Value) -> Result<T> {
    serde_json::from_value(value)
      .map_err(|e| eyre!("Failed to decode {} record: {}", self.def().table, e))
  }

  fn decode_all(&self, values: Vec<Value>) -> Vec<T> {
    values
      .into_iter()
      .filter_map(|value| match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
          warn!(table = %self.def().table, error = %e, "Skipping undecodable record");
          None
        }
      })
      .collect()
  }

  /// All records of this type.
  pub async fn list(&self) -> Result<Vec<T>> {
    self.list_with(self.def().collection(), Filter::new()).await
  }

  /// Records belonging to one parent (e.g. the tasks of a project).
  pub async fn list_in(&self, scope_id: &str) -> Result<Vec<T>> {
    let def = self.def();
    let (Some(scope), Some(key)) = (&def.scope, def.scoped(scope_id)) else {
      return Err(eyre!("{} records are not scoped by a parent", def.table));
    };
    if is_temp_id(scope_id) {
      // The backend has never seen this parent, so its children are local only
      debug!(table = %def.table, scope_id, "Serving children of unsynced parent from cache");
      return self.cached(Some(scope_id));
    }
    let filter = Filter::new().eq(scope.field, scope_id);
    self.list_with(key, filter).await
  }

  /// Records owned by one user (e.g. notifications).
  pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<T>> {
    let def = self.def();
    let filter = match def.owner_field {
      Some(field) => Filter::new().eq(field, owner_id),
      None => Filter::new(),
    };
    self.list_with(def.collection(), filter).await
  }

  async fn list_with(&self, key: CacheKey, filter: Filter) -> Result<Vec<T>> {
    let online = self.services.is_online().await;
    let remote = Arc::clone(&self.services.remote);
    let table = self.def().table;

    let Some(result) = self
      .services
      .cache
      .fetch::<Vec<Value>, _, _>(&key, online, || async move { remote.list(table, &filter).await })
      .await?
    else {
      return Ok(Vec::new());
    };
    debug!(key = %key, source = ?result.source, cached_at = ?result.cached_at, "Listing records");

    if result.source == CacheSource::Network && self.reapply_queued(None)? > 0 {
      if let Some(entry) = self.services.cache.peek::<Vec<Value>>(&key)? {
        return Ok(self.decode_all(entry.data));
      }
    }
    Ok(self.decode_all(result.data))
  }

  /// Put queued changes of this table (or of one record) back on top of
  /// freshly fetched remote data.
  fn reapply_queued(&self, id: Option<&str>) -> Result<usize> {
    let mut changes = self.services.queue.drain()?;
    if let Some(id) = id {
      changes.retain(|change| change.record_id == id);
    }
    let applied = cascade::reapply(&self.services.cache, self.def(), &changes)?;
    if applied > 0 {
      debug!(table = %self.def().table, applied, "Reapplied queued changes over remote data");
    }
    Ok(applied)
  }

  /// Cache a record read from the remote store, keeping queued edits to it.
  fn store_fetched(&self, record: Value) -> Result<Option<T>> {
    let def = self.def();
    let cache = &self.services.cache;
    cascade::apply(cache, def, CacheChange::Upsert(&record))?;
    let id = record_id(&record).map(str::to_string).unwrap_or_default();
    if self.reapply_queued(Some(&id))? == 0 {
      return self.decode(record).map(Some);
    }
    cascade::find(cache, def, &id)?.map(|v| self.decode(v)).transpose()
  }

  /// Cached records under the collection (or one parent's collection),
  /// without touching the network.
  pub fn cached(&self, scope_id: Option<&str>) -> Result<Vec<T>> {
    let def = self.def();
    let key = match scope_id {
      Some(scope_id) => def
        .scoped(scope_id)
        .ok_or_else(|| eyre!("{} records are not scoped by a parent", def.table))?,
      None => def.collection(),
    };
    match self.services.cache.peek::<Vec<Value>>(&key)? {
      Some(entry) => Ok(self.decode_all(entry.data)),
      None => Ok(Vec::new()),
    }
  }

  /// One record by id.
  ///
  /// Temporary ids only exist locally and are always answered from cache.
  pub async fn get(&self, id: &str) -> Result<Option<T>> {
    let def = self.def();
    let cache = &self.services.cache;

    if is_temp_id(id) {
      return cascade::find(cache, def, id)?.map(|v| self.decode(v)).transpose();
    }

    let online = self.services.is_online().await;
    let cached = match def.detail(id) {
      Some(key) => cache.read::<Value>(&key, online)?,
      None => CacheRead::Missing,
    };

    match cached {
      CacheRead::Fresh(entry) => {
        debug!(table = %def.table, id, "Serving cached record");
        self.decode(entry.data).map(Some)
      }
      CacheRead::Stale(entry) => match self.services.remote.get(def.table, id).await {
        Ok(Some(record)) => self.store_fetched(record),
        Ok(None) => {
          cascade::apply(cache, def, CacheChange::Remove { id })?;
          Ok(None)
        }
        Err(e) => {
          warn!(table = %def.table, id, error = %e, "Refresh failed, serving stale record");
          self.decode(entry.data).map(Some)
        }
      },
      CacheRead::Missing if !online => {
        cascade::find(cache, def, id)?.map(|v| self.decode(v)).transpose()
      }
      CacheRead::Missing => match self.services.remote.get(def.table, id).await {
        Ok(Some(record)) => self.store_fetched(record),
        Ok(None) => Ok(None),
        Err(e) => match cascade::find(cache, def, id)? {
          // A copy inside a cached collection still beats an error
          Some(record) => {
            warn!(table = %def.table, id, error = %e, "Fetch failed, serving cached copy");
            self.decode(record).map(Some)
          }
          None => Err(e),
        },
      },
    }
  }

  /// Create a record.
  ///
  /// Offline, a record without an id gets a temporary one, is cached
  /// immediately and an INSERT is queued.
  pub async fn create(&self, mut record: T) -> Result<T> {
    let def = self.def();
    let mut value = serde_json::to_value(&record)
      .map_err(|e| eyre!("Failed to serialize {} record: {}", def.table, e))?;

    let online = self.services.is_online().await;
    if online && !references_temp(&value) {
      if record.id().is_empty() {
        if let Some(fields) = value.as_object_mut() {
          fields.remove("id");
        }
      }
      let stored = self.services.remote.insert(def.table, &value).await?;
      cascade::apply(&self.services.cache, def, CacheChange::Upsert(&stored))?;
      return self.decode(stored);
    }

    if record.id().is_empty() {
      record.set_id(temp_id());
      value = serde_json::to_value(&record)
        .map_err(|e| eyre!("Failed to serialize {} record: {}", def.table, e))?;
    }

    cascade::apply(&self.services.cache, def, CacheChange::Upsert(&value))?;
    self
      .services
      .queue
      .enqueue(PendingChange::insert(def.table, record.id(), value))?;

    Ok(record)
  }

  /// Apply a partial update (a JSON object of changed fields).
  ///
  /// Returns the updated record when it is known locally or remotely.
  pub async fn update(&self, id: &str, patch: Value) -> Result<Option<T>> {
    let def = self.def();
    if !patch.is_object() {
      return Err(eyre!("Update of {} {} must be an object", def.table, id));
    }

    let online = self.services.is_online().await;
    if online && !is_temp_id(id) && !references_temp(&patch) {
      let stored = self.services.remote.update(def.table, id, &patch).await?;
      cascade::apply(&self.services.cache, def, CacheChange::Upsert(&stored))?;
      return self.decode(stored).map(Some);
    }

    let merged = cascade::apply(
      &self.services.cache,
      def,
      CacheChange::Patch {
        id,
        partial: &patch,
      },
    )?;
    self
      .services
      .queue
      .enqueue(PendingChange::update(def.table, id, patch))?;

    merged.map(|v| self.decode(v)).transpose()
  }

  /// Delete a record.
  pub async fn delete(&self, id: &str) -> Result<()> {
    let def = self.def();
    let online = self.services.is_online().await;

    if online && !is_temp_id(id) {
      self.services.remote.delete(def.table, id).await?;
      cascade::apply(&self.services.cache, def, CacheChange::Remove { id })?;
      return Ok(());
    }

    cascade::apply(&self.services.cache, def, CacheChange::Remove { id })?;
    self
      .services
      .queue
      .enqueue(PendingChange::delete(def.table, id))?;
    Ok(())
  }
}
