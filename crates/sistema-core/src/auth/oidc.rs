//! OpenID Connect session: Authorization Code + PKCE.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use tracing::{info, warn};

use super::oauth::{self, OAuthCache, OAuthCredentials};
use super::{Session, SessionProvider, mask_token};
use crate::config::{AuthConfig, RefreshExpiredPolicy};

/// Everything the user needs to complete the browser step.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Authorization URL to open
    pub url: String,
    /// Expected `state` echoed by the redirect
    pub state: String,
    /// Where the provider will redirect
    pub redirect_uri: String,
}

/// Front end of the browser step: shows the URL and returns the code.
pub trait CodeReceiver: Send + Sync {
    fn receive<'a>(&'a self, request: &'a AuthorizationRequest) -> BoxFuture<'a, Result<String>>;
}

/// Session provider backed by the OIDC provider in [`AuthConfig`].
pub struct OidcSession {
    config: AuthConfig,
    http: reqwest::Client,
    cache_path: PathBuf,
    receiver: Arc<dyn CodeReceiver>,
    credentials: RwLock<Option<OAuthCredentials>>,
}

impl OidcSession {
    /// Creates a session using the default credential cache.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: AuthConfig, receiver: Arc<dyn CodeReceiver>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::api::USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            http,
            cache_path: OAuthCache::cache_path(),
            receiver,
            credentials: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn with_cache_path(mut self, path: PathBuf) -> Self {
        self.cache_path = path;
        self
    }

    pub fn cache_path(&self) -> &PathBuf {
        &self.cache_path
    }

    /// Currently held credentials.
    pub fn credentials(&self) -> Option<OAuthCredentials> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Loads cached credentials, refreshes them if expired, and applies
    /// `auto_login` when nothing is cached.
    ///
    /// # Errors
    /// Returns an error if the cache is unreadable or a triggered login fails.
    pub async fn initialize(&self) -> Result<()> {
        self.load_cached()?;
        self.refresh_if_expired().await?;

        if self.credentials().is_none() && self.config.auto_login {
            info!("no cached session, starting login");
            self.run_login().await?;
        }
        Ok(())
    }

    /// Loads this client's cached credentials as-is, without refreshing.
    ///
    /// # Errors
    /// Returns an error if the cache is unreadable.
    pub fn load_cached(&self) -> Result<Option<OAuthCredentials>> {
        let cache = OAuthCache::load_from(&self.cache_path)?;
        let cached = cache.get(&self.config.client_id).cloned();
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = cached.clone();
        Ok(cached)
    }

    /// Refreshes an expired access token.
    ///
    /// When refresh is impossible the `on_refresh_expire` policy decides
    /// between a new login and dropping the session.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be written or a triggered login fails.
    pub async fn refresh_if_expired(&self) -> Result<()> {
        let Some(creds) = self.credentials() else {
            return Ok(());
        };
        if !creds.is_expired() {
            return Ok(());
        }

        let refreshed = match creds.refresh.as_deref() {
            Some(refresh) => oauth::refresh_token(&self.http, &self.config, refresh).await,
            None => Err(anyhow::anyhow!("No refresh token cached")),
        };

        match refreshed {
            Ok(fresh) => {
                info!(token = %mask_token(&fresh.access), "access token refreshed");
                self.store(Some(fresh))
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "token refresh failed");
                self.store(None)?;
                match self.config.on_refresh_expire {
                    RefreshExpiredPolicy::Login => self.run_login().await,
                    RefreshExpiredPolicy::Logout => Ok(()),
                }
            }
        }
    }

    async fn run_login(&self) -> Result<()> {
        let pkce = oauth::generate_pkce();
        let state = uuid::Uuid::new_v4().to_string();
        let request = AuthorizationRequest {
            url: oauth::build_auth_url(&self.config, &pkce, &state),
            state,
            redirect_uri: self.config.redirect_uri.clone(),
        };

        let code = self.receiver.receive(&request).await?;
        let code = code.trim();
        if code.is_empty() {
            anyhow::bail!("Authorization code cannot be empty");
        }

        let creds = oauth::exchange_code(&self.http, &self.config, code, &pkce).await?;
        info!(token = %mask_token(&creds.access), "logged in");
        self.store(Some(creds))
    }

    async fn run_logout(&self) -> Result<()> {
        let previous = self.credentials();
        self.store(None)?;

        if let Some(refresh) = previous.and_then(|c| c.refresh)
            && let Err(err) = oauth::end_session(&self.http, &self.config, &refresh).await
        {
            warn!(error = %format!("{err:#}"), "server-side logout failed");
        }
        info!("logged out");
        Ok(())
    }

    /// Replaces the in-memory credentials and persists them.
    fn store(&self, creds: Option<OAuthCredentials>) -> Result<()> {
        let mut cache = OAuthCache::load_from(&self.cache_path)?;
        match &creds {
            Some(creds) => cache.set(&self.config.client_id, creds.clone()),
            None => {
                cache.remove(&self.config.client_id);
            }
        }
        cache.save_to(&self.cache_path)?;

        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = creds;
        Ok(())
    }
}

impl SessionProvider for OidcSession {
    fn session(&self) -> Session {
        Session::from_token(self.credentials().map(|c| c.access))
    }

    fn refresh(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.refresh_if_expired())
    }

    fn login(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.run_login())
    }

    fn logout(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.run_logout())
    }
}
