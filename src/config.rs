use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  /// Signed-in user; scopes notifications and owns profile preferences
  pub user_id: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Base URL of the backend, e.g. https://<project>.supabase.co
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Freshness window for cached reads
  #[serde(default = "default_stale_minutes")]
  pub stale_minutes: i64,
  /// Location of the SQLite store (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_minutes: default_stale_minutes(),
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Failed replays kept for later passes before a change is dropped.
  /// Zero drops every failed change after its first attempt.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_retries: default_max_retries(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
  /// URL probed for reachability (defaults to the backend URL)
  pub url: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      url: None,
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_stale_minutes() -> i64 {
  5
}

fn default_max_retries() -> u32 {
  3
}

fn default_timeout_secs() -> u64 {
  3
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./plansync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/plansync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/plansync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("plansync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("plansync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Get the backend API key from environment variables.
  ///
  /// Checks PLANSYNC_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("PLANSYNC_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Backend API key not found. Set PLANSYNC_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }

  /// Path of the persistent store.
  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => crate::kv::SqliteStore::default_path(),
    }
  }

  pub fn stale_time(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.cache.stale_minutes)
  }
}
