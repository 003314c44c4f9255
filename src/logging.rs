//! Tracing subscriber setup for the binary.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "PLANSYNC_LOG";

/// Directory for log files.
pub fn log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join("plansync").join("logs"))
}

fn filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Logs go to a daily rolling file, or to stderr when `verbose` is set.
/// The returned guard must be held until exit so buffered lines are flushed.
pub fn init(verbose: bool) -> Result<Option<WorkerGuard>> {
  if verbose {
    tracing_subscriber::fmt()
      .with_env_filter(filter())
      .with_target(true)
      .with_writer(std::io::stderr)
      .try_init()
      .map_err(|e| eyre!("Failed to install logger: {}", e))?;
    return Ok(None);
  }

  let dir = log_dir()?;
  std::fs::create_dir_all(&dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(&dir, "plansync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter())
    .with_target(true)
    .with_ansi(false)
    .with_writer(writer)
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(Some(guard))
}
