//! Online/offline status probe.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;

/// Reports whether the backend is currently reachable.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
  async fn is_online(&self) -> Result<bool>;
}

/// Ask the probe, treating a failing probe as offline.
pub async fn check(probe: &dyn ConnectivityProbe) -> bool {
  match probe.is_online().await {
    Ok(online) => online,
    Err(e) => {
      warn!(error = %e, "Connectivity probe failed, assuming offline");
      false
    }
  }
}

/// Probe that issues a lightweight HTTP request to the backend.
///
/// Any HTTP response counts as online, including error statuses; only
/// transport failures (DNS, refused connection, timeout) count as offline.
pub struct HttpProbe {
  client: reqwest::Client,
  url: Url,
}

impl HttpProbe {
  pub fn new(config: &Config) -> Result<Self> {
    let target = config
      .connectivity
      .url
      .as_deref()
      .unwrap_or(&config.backend.url);
    Self::with_url(target, Duration::from_secs(config.connectivity.timeout_secs))
  }

  pub fn with_url(url: &str, timeout: Duration) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid connectivity URL {}: {}", url, e))?;
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client, url })
  }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
  async fn is_online(&self) -> Result<bool> {
    match self.client.head(self.url.clone()).send().await {
      Ok(response) => {
        debug!(status = %response.status(), "Backend reachable");
        Ok(true)
      }
      Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
        debug!(error = %e, "Backend unreachable");
        Ok(false)
      }
      Err(e) => Err(eyre!("Connectivity check failed: {}", e)),
    }
  }
}

/// Probe with a fixed, switchable answer.
#[derive(Debug)]
pub struct StaticProbe {
  online: AtomicBool,
}

impl StaticProbe {
  pub fn new(online: bool) -> Self {
    Self {
      online: AtomicBool::new(online),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
  async fn is_online(&self) -> Result<bool> {
    Ok(self.online.load(Ordering::SeqCst))
  }
}
