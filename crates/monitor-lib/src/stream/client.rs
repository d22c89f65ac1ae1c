//! Stream-serving control API client
//!
//! Owns the bearer token for the stream-serving layer. The token is cached
//! with its expiry, refreshed ahead of time by a configurable skew, and
//! dropped and refetched once when a call comes back 401.

use super::{StreamControl, StreamState};
use crate::clock::{span, Clock};
use crate::error::StreamApiError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Lifetime assumed when the login response omits `expires_in`
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Connection settings for the stream-serving API
#[derive(Debug, Clone)]
pub struct StreamApiConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Per-request timeout (default: 30 seconds)
    pub timeout: Duration,
    /// Refresh the token this long before it expires (default: 30 seconds)
    pub token_skew: Duration,
}

impl Default for StreamApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            username: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(30),
            token_skew: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Client for the external stream service
pub struct StreamApiClient {
    client: Client,
    base_url: Url,
    config: StreamApiConfig,
    clock: Arc<dyn Clock>,
    token: Mutex<Option<CachedToken>>,
}

impl StreamApiClient {
    pub fn new(config: StreamApiConfig, clock: Arc<dyn Clock>) -> Result<Self, StreamApiError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        let normalized = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };
        let base_url = Url::parse(&normalized)?;

        Ok(Self {
            client,
            base_url,
            config,
            clock,
            token: Mutex::new(None),
        })
    }

    /// Log in and replace the cached token
    pub async fn authenticate(&self) -> Result<String, StreamApiError> {
        let mut cached = self.token.lock().await;
        let fresh = self.login().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    /// Current state of a single stream
    pub async fn stream_status(&self, stream_id: &str) -> Result<StreamState, StreamApiError> {
        let url = self.base_url.join(&format!("api/streams/{}", stream_id))?;
        self.send_authorized(Method::GET, url).await
    }

    pub async fn streams_for_camera(&self, camera_id: &str) -> Result<Vec<StreamState>, StreamApiError> {
        let mut url = self.base_url.join("api/streams")?;
        url.query_pairs_mut().append_pair("camera_id", camera_id);
        self.send_authorized(Method::GET, url).await
    }

    pub async fn list_streams(&self) -> Result<Vec<StreamState>, StreamApiError> {
        let url = self.base_url.join("api/streams")?;
        self.send_authorized(Method::GET, url).await
    }

    /// Ask the service to start the stream again
    pub async fn restart_stream(&self, stream_id: &str) -> Result<StreamState, StreamApiError> {
        let url = self.base_url.join(&format!("api/streams/{}/start", stream_id))?;
        self.send_authorized(Method::POST, url).await
    }

    /// Touch the serving layer's liveness endpoint so idle proxies stay up
    pub async fn keep_alive(&self) -> Result<(), StreamApiError> {
        let url = self.base_url.join("api/health")?;
        let response = self.client.get(url).send().await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn login(&self) -> Result<CachedToken, StreamApiError> {
        let url = self.base_url.join("api/auth/login")?;
        let body = LoginRequest {
            username: &self.config.username,
            password: &self.config.password,
        };

        let response = self.client.post(url).json(&body).send().await?;
        let login: LoginResponse = Self::check_status(response).await?.json().await?;

        let ttl = Duration::from_secs(login.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS));
        let expires_at = self.clock.now() + span(ttl);
        info!(expires_at = %expires_at, "Authenticated with stream API");

        Ok(CachedToken {
            token: login.token,
            expires_at,
        })
    }

    /// Cached token, refreshing under the lock so concurrent callers share one login
    async fn bearer(&self) -> Result<String, StreamApiError> {
        let mut cached = self.token.lock().await;
        let now = self.clock.now();

        if let Some(token) = cached.as_ref() {
            if now < token.expires_at - span(self.config.token_skew) {
                return Ok(token.token.clone());
            }
            debug!("Stream API token near expiry, refreshing");
        }

        let fresh = self.login().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    /// Forget `rejected` unless another caller has already replaced it
    async fn invalidate(&self, rejected: &str) {
        let mut cached = self.token.lock().await;
        if cached.as_ref().is_some_and(|t| t.token == rejected) {
            *cached = None;
        }
    }

    async fn send_authorized<R: DeserializeOwned>(&self, method: Method, url: Url) -> Result<R, StreamApiError> {
        let token = self.bearer().await?;
        let response = self
            .client
            .request(method.clone(), url.clone())
            .bearer_auth(&token)
            .send()
            .await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            warn!(path = url.path(), "Stream API token rejected, re-authenticating");
            self.invalidate(&token).await;
            let token = self.bearer().await?;
            self.client.request(method, url).bearer_auth(&token).send().await?
        } else {
            response
        };

        Ok(Self::check_status(response).await?.json().await?)
    }

    async fn check_status(response: Response) -> Result<Response, StreamApiError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(StreamApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl StreamControl for StreamApiClient {
    async fn stream_status(&self, stream_id: &str) -> Result<StreamState, StreamApiError> {
        StreamApiClient::stream_status(self, stream_id).await
    }

    async fn streams_for_camera(&self, camera_id: &str) -> Result<Vec<StreamState>, StreamApiError> {
        StreamApiClient::streams_for_camera(self, camera_id).await
    }

    async fn restart_stream(&self, stream_id: &str) -> Result<StreamState, StreamApiError> {
        StreamApiClient::restart_stream(self, stream_id).await
    }

    async fn keep_alive(&self) -> Result<(), StreamApiError> {
        StreamApiClient::keep_alive(self).await
    }
}
