use color_eyre::Result;
use serde_json::json;
use tracing::info;

use super::cascade::{self, CacheChange};
use super::EntityAdapter;
use crate::models::{Notification, Record};
use crate::queue::{BulkUpdate, PendingChange};
use crate::remote::Filter;

impl EntityAdapter<Notification> {
  /// Mark every notification of `user_id` as read.
  ///
  /// Cached lists are patched immediately. Offline the bulk update is queued
  /// as a `MARK_ALL_READ` change.
  pub async fn mark_all_read(&self, user_id: &str) -> Result<()> {
    let def = Notification::def();
    let bulk = BulkUpdate {
      filter: Filter::new().eq("user_id", user_id),
      patch: json!({ "read": true }),
    };

    let services = self.services();
    let online = services.is_online().await;
    if online {
      let updated = services
        .remote
        .update_where(def.table, &bulk.filter, &bulk.patch)
        .await?;
      info!(user_id, updated, "Marked notifications read");
    } else {
      services
        .queue
        .enqueue(PendingChange::mark_all_read(def.table, &bulk)?)?;
    }

    cascade::apply(&services.cache, def, CacheChange::PatchWhere {
      filter: &bulk.filter,
      partial: &bulk.patch,
    })?;
    Ok(())
  }
}
