//! Remote entity API client

use super::{Entity, Filter, Repository};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default request timeout for entity API calls
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON CRUD client for the platform's entity API
///
/// Routes:
/// - `POST {base}/entities/{collection}/filter` with `{"query": ...}`
/// - `GET {base}/entities/{collection}/{id}`
/// - `POST {base}/entities/{collection}`
/// - `PUT {base}/entities/{collection}/{id}`
pub struct HttpEntityStore {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpEntityStore {
    pub fn new(base_url: &str, api_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        // Url::join drops the last path segment unless it ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).context("Invalid entity API URL")?;

        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    fn url(&self, collection: &str, suffix: Option<&str>) -> Result<Url> {
        let path = match suffix {
            Some(suffix) => format!("entities/{}/{}", collection, suffix),
            None => format!("entities/{}", collection),
        };
        self.base_url.join(&path).context("Invalid entity path")
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<R: DeserializeOwned>(builder: RequestBuilder, what: &str) -> Result<R> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Entity API error on {} ({}): {}", what, status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for HttpEntityStore {
    async fn filter(&self, filter: &Filter) -> Result<Vec<T>> {
        let url = self.url(T::COLLECTION, Some("filter"))?;
        let body = serde_json::json!({ "query": filter.to_query() });
        debug!(collection = T::COLLECTION, query = %body, "Filtering entities");

        Self::send(self.request(Method::POST, url).json(&body), "filter").await
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        let url = self.url(T::COLLECTION, Some(id))?;
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .context("Failed to send get request")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Entity API error on get ({}): {}", status, body);
        }

        response
            .json()
            .await
            .map(Some)
            .context("Failed to parse get response")
    }

    async fn create(&self, record: T) -> Result<T> {
        let url = self.url(T::COLLECTION, None)?;
        Self::send(self.request(Method::POST, url).json(&record), "create").await
    }

    async fn update(&self, record: T) -> Result<T> {
        let url = self.url(T::COLLECTION, Some(record.id()))?;
        Self::send(self.request(Method::PUT, url).json(&record), "update").await
    }
}
