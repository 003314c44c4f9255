//! User preferences stored on the profile row.

use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::Services;
use crate::table::Table;

/// Key holding a theme chosen while offline.
pub const PENDING_THEME_KEY: &str = "pendingThemeChange";

#[derive(Clone)]
pub struct Preferences {
  services: Arc<Services>,
  user_id: Option<String>,
}

impl Preferences {
  pub fn new(services: Arc<Services>, user_id: Option<String>) -> Self {
    Self { services, user_id }
  }

  fn user_id(&self) -> Result<&str> {
    self
      .user_id
      .as_deref()
      .ok_or_else(|| eyre!("No user configured, set user_id in the config file"))
  }

  /// Change the theme, remotely when online or as a pending change otherwise.
  pub async fn set_theme(&self, theme: &str) -> Result<()> {
    let user_id = self.user_id()?;

    if self.services.is_online().await {
      self
        .services
        .remote
        .update(Table::Profiles, user_id, &json!({ "theme": theme }))
        .await?;
      // A newer choice supersedes anything still pending
      self.services.kv.remove(PENDING_THEME_KEY)?;
      info!(theme, "Theme updated");
    } else {
      self.services.kv.set(PENDING_THEME_KEY, theme)?;
      info!(theme, "Theme change stored until next sync");
    }
    Ok(())
  }

  /// Theme waiting to be pushed, if any.
  pub fn pending_theme(&self) -> Result<Option<String>> {
    self.services.kv.get(PENDING_THEME_KEY)
  }

  /// Push a pending theme change. Returns whether one was applied.
  ///
  /// The pending value is kept when the update fails.
  pub async fn apply_pending(&self) -> Result<bool> {
    let Some(theme) = self.pending_theme()? else {
      return Ok(false);
    };
    let Some(user_id) = self.user_id.as_deref() else {
      warn!("Pending theme change but no user configured");
      return Ok(false);
    };

    self
      .services
      .remote
      .update(Table::Profiles, user_id, &json!({ "theme": theme }))
      .await?;
    self.services.kv.remove(PENDING_THEME_KEY)?;
    info!(theme = %theme, "Applied pending theme change");
    Ok(true)
  }
}
