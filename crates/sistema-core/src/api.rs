//! HTTP client for the notes API.
//!
//! Every request carries the bearer token and a JSON content type. Success is
//! any 2xx status; the status code is never interpreted beyond that.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

/// Standard User-Agent header for API requests.
pub const USER_AGENT: &str = concat!("sistema/", env!("CARGO_PKG_VERSION"));

/// Pause before retry `n` is `n` times this.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Server-assigned note identifier.
///
/// The API may hand out numeric or string ids; both render verbatim in paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoteId {
    Number(i64),
    Text(String),
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteId::Number(n) => fmt::Display::fmt(n, f),
            NoteId::Text(s) => f.pad(s),
        }
    }
}

impl FromStr for NoteId {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err("Note id cannot be empty".to_string());
        }
        Ok(value
            .parse::<i64>()
            .map_or_else(|_| NoteId::Text(value.to_string()), NoteId::Number))
    }
}

impl From<i64> for NoteId {
    fn from(value: i64) -> Self {
        NoteId::Number(value)
    }
}

/// A note as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub message: String,
}

impl Note {
    pub fn new(id: impl Into<NoteId>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    message: &'a str,
}

/// Failure of a single API call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The server answered with a non-2xx status.
    #[error("HTTP {status}")]
    Status { status: StatusCode, body: String },
    /// The request never produced a usable response.
    #[error("{message}")]
    Transport { message: String, retryable: bool },
}

impl ApiError {
    fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out after {}ms", timeout.as_millis())
        } else {
            err.to_string()
        };
        ApiError::Transport {
            message,
            retryable: err.is_timeout() || err.is_connect(),
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Transport {
                retryable: true,
                ..
            }
        )
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Client for the `/users` and `/messages` endpoints.
#[derive(Debug, Clone)]
pub struct NotesApi {
    http: reqwest::Client,
    base_url: url::Url,
    timeout: Duration,
    max_retries: u32,
}

impl NotesApi {
    /// Builds a client for `base_url`.
    ///
    /// # Errors
    /// Returns an error if the URL is malformed or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration, max_retries: u32) -> Result<Self> {
        let parsed = url::Url::parse(base_url.trim())
            .with_context(|| format!("Invalid API base URL: {base_url}"))?;
        if parsed.cannot_be_a_base() {
            anyhow::bail!("Invalid API base URL: {base_url}");
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: parsed,
            timeout,
            max_retries,
        })
    }

    /// Builds a client from the resolved configuration.
    ///
    /// # Errors
    /// Returns an error if the configured base URL is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.effective_base_url()?,
            config.request_timeout(),
            config.api.max_retries,
        )
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// `POST /users/register`. The response body is ignored.
    ///
    /// # Errors
    /// Returns an error on transport failure or non-2xx status.
    pub async fn register_user(&self, token: &str) -> ApiResult<()> {
        self.send(Method::POST, &["users", "register"], token, None)
            .await
            .map(drop)
    }

    /// `GET /messages`.
    ///
    /// # Errors
    /// Returns an error on transport failure, non-2xx status or a malformed body.
    pub async fn list_messages(&self, token: &str) -> ApiResult<Vec<Note>> {
        let response = self.send(Method::GET, &["messages"], token, None).await?;
        decode(response).await
    }

    /// `POST /messages`.
    ///
    /// # Errors
    /// Returns an error on transport failure, non-2xx status or a malformed body.
    pub async fn create_message(&self, token: &str, message: &str) -> ApiResult<Note> {
        let body = MessageBody { message };
        let response = self
            .send(Method::POST, &["messages"], token, Some(&body))
            .await?;
        decode(response).await
    }

    /// `PUT /messages/{id}`.
    ///
    /// # Errors
    /// Returns an error on transport failure, non-2xx status or a malformed body.
    pub async fn update_message(&self, token: &str, id: &NoteId, message: &str) -> ApiResult<Note> {
        let body = MessageBody { message };
        let id = id.to_string();
        let response = self
            .send(Method::PUT, &["messages", &id], token, Some(&body))
            .await?;
        decode(response).await
    }

    /// `DELETE /messages/{id}`. The response body is ignored.
    ///
    /// # Errors
    /// Returns an error on transport failure or non-2xx status.
    pub async fn delete_message(&self, token: &str, id: &NoteId) -> ApiResult<()> {
        let id = id.to_string();
        self.send(Method::DELETE, &["messages", &id], token, None)
            .await
            .map(drop)
    }

    /// Sends one request, retrying idempotent methods on timeout or connect errors.
    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        token: &str,
        body: Option<&MessageBody<'_>>,
    ) -> ApiResult<Response> {
        let url = self.endpoint(segments);
        let attempts = if method.is_idempotent() {
            self.max_retries + 1
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            debug!(%method, %url, attempt, "sending request");
            match self.send_once(method.clone(), &url, token, body).await {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(%method, %url, attempt, error = %err, "request failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Appends percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> url::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send_once(
        &self,
        method: Method,
        url: &url::Url,
        token: &str,
        body: Option<&MessageBody<'_>>,
    ) -> ApiResult<Response> {
        let mut request = self
            .http
            .request(method, url.clone())
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ApiError::from_reqwest(&err, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, %url, "request rejected");
            return Err(ApiError::Status { status, body });
        }
        Ok(response)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let bytes = response.bytes().await.map_err(|err| ApiError::Transport {
        message: err.to_string(),
        retryable: false,
    })?;
    serde_json::from_slice(&bytes).map_err(|err| ApiError::Transport {
        message: format!("invalid response body: {err}"),
        retryable: false,
    })
}
