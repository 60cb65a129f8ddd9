use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::store::PendingQueue;

use super::api_types::{
  ApiEntryResponse, ApiNutritionResponse, ApiProductResponse, ApiSyncResponse,
};
use super::types::{Entry, NutrientSet, Product, RecordId, ServerState};

/// Remote side of the sync protocol.
///
/// Every method resolves to `Err` for any transport problem: unreachable
/// host, non-2xx status or an unparseable body. Callers do not need to tell
/// these apart.
pub trait RemoteGateway: Send + Sync {
  /// Pull the full server state.
  fn pull(&self) -> BoxFuture<'_, Result<ServerState>>;

  /// Send every pending mutation in one batch.
  fn push<'a>(&'a self, queue: &'a PendingQueue) -> BoxFuture<'a, Result<()>>;

  /// Create a diary entry, returning it with its server id.
  fn create_entry<'a>(&'a self, entry: &'a Entry) -> BoxFuture<'a, Result<Entry>>;

  /// Delete a diary entry by server id.
  fn delete_entry<'a>(&'a self, id: &'a RecordId) -> BoxFuture<'a, Result<()>>;

  /// Create a catalog product, returning it with its server id.
  fn create_product<'a>(&'a self, product: &'a Product) -> BoxFuture<'a, Result<Product>>;
}

/// HTTP gateway for the food diary API
#[derive(Clone)]
pub struct HttpGateway {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpGateway {
  pub fn new(config: &Config) -> Result<Self> {
    let base_url = config.server.base_url()?;

    let mut headers = HeaderMap::new();
    if let Some(session) = Config::get_session_cookie() {
      let value = HeaderValue::from_str(&format!("session={}", session))
        .map_err(|e| eyre!("Invalid session cookie: {}", e))?;
      headers.insert(COOKIE, value);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.server.request_timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Failed to build url for {}: {}", path, e))
  }

  async fn send_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
    let response = self.send(request).await?;
    let url = response.url().clone();
    response
      .json::<T>()
      .await
      .map_err(|e| eyre!("Malformed response from {}: {}", url, e))
  }

  async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Request failed: {}", e))?;

    let status = response.status();
    debug!(url = %response.url(), %status, "API response");

    response
      .error_for_status()
      .map_err(|e| eyre!("Server returned {}: {}", status, e))
  }

  /// `GET /api/sync`
  async fn get_sync(&self) -> Result<ServerState> {
    let url = self.endpoint("api/sync")?;
    let response: ApiSyncResponse = self.send_json(self.client.get(url)).await?;
    response.into_state()
  }

  /// `POST /api/sync`; the response body is ignored.
  async fn post_sync(&self, queue: &PendingQueue) -> Result<()> {
    let url = self.endpoint("api/sync")?;
    self.send(self.client.post(url).json(queue)).await?;
    Ok(())
  }

  /// `POST /api/add_entry`
  async fn add_entry(&self, entry: &Entry) -> Result<Entry> {
    let url = self.endpoint("api/add_entry")?;
    let mut body = entry.clone();
    body.id = None;

    let response: ApiEntryResponse = self.send_json(self.client.post(url).json(&body)).await?;
    Ok(response.entry)
  }

  /// `DELETE /api/delete_entry/{id}`
  async fn remove_entry(&self, id: &RecordId) -> Result<()> {
    let url = self.endpoint(&format!("api/delete_entry/{}", id))?;
    self.send(self.client.delete(url)).await?;
    Ok(())
  }

  /// `POST /api/add_product`
  async fn add_product(&self, product: &Product) -> Result<Product> {
    let url = self.endpoint("api/add_product")?;
    let mut body = product.clone();
    body.id = None;

    let response: ApiProductResponse = self.send_json(self.client.post(url).json(&body)).await?;
    Ok(response.product)
  }

  /// Search the product catalog by name.
  pub async fn search_products(&self, query: &str) -> Result<Vec<Product>> {
    let mut url = self.endpoint("api/search_products")?;
    url.query_pairs_mut().append_pair("q", query);

    self.send_json(self.client.get(url)).await
  }

  /// Nutrition of a product at the given weight, as computed by the server.
  pub async fn product_nutrition(&self, product_id: i64, weight: f64) -> Result<NutrientSet> {
    let mut url = self.endpoint(&format!("api/product/{}", product_id))?;
    url
      .query_pairs_mut()
      .append_pair("weight", &weight.to_string());

    let response: ApiNutritionResponse = self.send_json(self.client.get(url)).await?;
    Ok(response.into())
  }
}

impl RemoteGateway for HttpGateway {
  fn pull(&self) -> BoxFuture<'_, Result<ServerState>> {
    self.get_sync().boxed()
  }

  fn push<'a>(&'a self, queue: &'a PendingQueue) -> BoxFuture<'a, Result<()>> {
    self.post_sync(queue).boxed()
  }

  fn create_entry<'a>(&'a self, entry: &'a Entry) -> BoxFuture<'a, Result<Entry>> {
    self.add_entry(entry).boxed()
  }

  fn delete_entry<'a>(&'a self, id: &'a RecordId) -> BoxFuture<'a, Result<()>> {
    self.remove_entry(id).boxed()
  }

  fn create_product<'a>(&'a self, product: &'a Product) -> BoxFuture<'a, Result<Product>> {
    self.add_product(product).boxed()
  }
}
