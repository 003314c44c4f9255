use std::collections::HashMap;
use std::fmt;

use crate::table::Table;

/// Why a sync pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  /// Another pass holds the guard
  AlreadyRunning,
  Offline,
  /// Empty queue and no pending preference change
  NothingToSync,
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SkipReason::AlreadyRunning => write!(f, "a sync is already running"),
      SkipReason::Offline => write!(f, "offline"),
      SkipReason::NothingToSync => write!(f, "nothing to sync"),
    }
  }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
  /// Changes replayed successfully
  pub applied: usize,
  /// Changes whose replay failed in this pass
  pub failed: usize,
  /// Failed changes removed after exhausting their retries
  pub dropped: usize,
  /// Changes left in the queue for the next pass
  pub retained: usize,
  pub theme_applied: bool,
  /// Temporary ids replaced by canonical ones
  pub remapped: HashMap<String, String>,
  /// Tables whose caches were rebuilt
  pub refreshed: Vec<Table>,
  pub skipped: Option<SkipReason>,
}

impl SyncReport {
  pub fn skipped(reason: SkipReason) -> Self {
    Self {
      skipped: Some(reason),
      ..Default::default()
    }
  }

  pub fn is_skipped(&self) -> bool {
    self.skipped.is_some()
  }
}

impl fmt::Display for SyncReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(reason) = self.skipped {
      return write!(f, "Sync skipped: {}", reason);
    }
    write!(
      f,
      "Applied {}, failed {} (dropped {}, retrying {}), refreshed {} tables",
      self.applied,
      self.failed,
      self.dropped,
      self.retained,
      self.refreshed.len()
    )
  }
}
