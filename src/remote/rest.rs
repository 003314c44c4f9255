//! PostgREST-style HTTP client for the backend store.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{Filter, RemoteStore};
use crate::config::Config;
use crate::table::Table;

/// Backend client speaking the PostgREST dialect (`/rest/v1/<table>`).
#[derive(Clone)]
pub struct RestRemote {
  client: reqwest::Client,
  base: Url,
  api_key: String,
}

impl RestRemote {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_key(&config.backend.url, api_key)
  }

  /// Build a client for `url` with an explicit key.
  pub fn with_key(url: &str, api_key: String) -> Result<Self> {
    let mut base = Url::parse(url).map_err(|e| eyre!("Invalid backend URL {}: {}", url, e))?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      api_key,
    })
  }

  /// Endpoint URL for `table`.
  pub fn table_url(&self, table: Table) -> Result<Url> {
    self
      .base
      .join(&format!("rest/v1/{}", table))
      .map_err(|e| eyre!("Failed to build URL for {}: {}", table, e))
  }

  fn request(&self, method: Method, table: Table, query: &[(String, String)]) -> Result<RequestBuilder> {
    let url = self.table_url(table)?;
    Ok(
      self
        .client
        .request(method, url)
        .query(query)
        .header("apikey", &self.api_key)
        .bearer_auth(&self.api_key),
    )
  }

  async fn send(request: RequestBuilder, what: &str) -> Result<Response> {
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", what, e))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(eyre!("Failed to {}: {} {}", what, status, body));
    }
    Ok(response)
  }

  async fn rows(response: Response, what: &str) -> Result<Vec<Value>> {
    response
      .json::<Vec<Value>>()
      .await
      .map_err(|e| eyre!("Failed to parse response to {}: {}", what, e))
  }
}

/// Query pairs for a filter, e.g. `user_id=eq.u1`.
pub(crate) fn filter_query(filter: &Filter) -> Vec<(String, String)> {
  filter
    .conditions()
    .map(|(field, value)| {
      let literal = match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
      };
      let op = if value.is_null() { "is" } else { "eq" };
      (field.to_string(), format!("{}.{}", op, literal))
    })
    .collect()
}

fn id_query(id: &str) -> Vec<(String, String)> {
  vec![("id".to_string(), format!("eq.{}", id))]
}

#[async_trait]
impl RemoteStore for RestRemote {
  async fn list(&self, table: Table, filter: &Filter) -> Result<Vec<Value>> {
    let mut query = vec![("select".to_string(), "*".to_string())];
    query.extend(filter_query(filter));

    let what = format!("list {}", table);
    debug!(table = %table, "GET");
    let response = Self::send(self.request(Method::GET, table, &query)?, &what).await?;
    Self::rows(response, &what).await
  }

  async fn get(&self, table: Table, id: &str) -> Result<Option<Value>> {
    let mut query = vec![("select".to_string(), "*".to_string())];
    query.extend(id_query(id));
    query.push(("limit".to_string(), "1".to_string()));

    let what = format!("get {} {}", table, id);
    let response = Self::send(self.request(Method::GET, table, &query)?, &what).await?;
    Ok(Self::rows(response, &what).await?.into_iter().next())
  }

  async fn insert(&self, table: Table, record: &Value) -> Result<Value> {
    let what = format!("insert into {}", table);
    let request = self
      .request(Method::POST, table, &[])?
      .header("Prefer", "return=representation")
      .json(record);

    let response = Self::send(request, &what).await?;
    Self::rows(response, &what)
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| eyre!("Failed to {}: no row returned", what))
  }

  async fn update(&self, table: Table, id: &str, patch: &Value) -> Result<Value> {
    let what = format!("update {} {}", table, id);
    let request = self
      .request(Method::PATCH, table, &id_query(id))?
      .header("Prefer", "return=representation")
      .json(patch);

    let response = Self::send(request, &what).await?;
    Self::rows(response, &what)
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| eyre!("Failed to {}: record not found", what))
  }

  async fn delete(&self, table: Table, id: &str) -> Result<()> {
    let what = format!("delete {} {}", table, id);
    Self::send(self.request(Method::DELETE, table, &id_query(id))?, &what).await?;
    Ok(())
  }

  async fn update_where(&self, table: Table, filter: &Filter, patch: &Value) -> Result<u64> {
    if filter.is_empty() {
      return Err(eyre!("Refusing bulk update of {} without a filter", table));
    }

    let what = format!("bulk update {}", table);
    let request = self
      .request(Method::PATCH, table, &filter_query(filter))?
      .header("Prefer", "return=representation")
      .json(patch);

    let response = Self::send(request, &what).await?;
    Ok(Self::rows(response, &what).await?.len() as u64)
  }
}
