//! Auth provider boundary.
//!
//! The notes client only ever sees a [`SessionProvider`]: the current bearer
//! token, its decoded claims, and login/logout triggers. How tokens are
//! obtained and refreshed stays behind the trait.

use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

pub mod callback;
pub mod oauth;
pub mod oidc;

pub use oidc::{AuthorizationRequest, CodeReceiver, OidcSession};

/// Decoded token claims.
pub type Claims = Map<String, Value>;

/// Snapshot of the authentication state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub token: Option<String>,
    pub claims: Option<Claims>,
}

impl Session {
    /// Builds a session from a bearer token, decoding its claims when it is a JWT.
    pub fn from_token(token: Option<String>) -> Self {
        let claims = token.as_deref().and_then(decode_claims);
        Self { token, claims }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Human-readable identity: `preferred_username`, then `email`, then `sub`.
    pub fn display_name(&self) -> Option<&str> {
        let claims = self.claims.as_ref()?;
        ["preferred_username", "email", "sub"]
            .iter()
            .find_map(|key| claims.get(*key).and_then(Value::as_str))
    }
}

/// Source of the current session, injected into the notes client.
pub trait SessionProvider: Send + Sync {
    /// Current token and claims.
    fn session(&self) -> Session;

    /// Renews the session if its token has expired.
    ///
    /// Called before every authenticated request. Providers whose tokens
    /// never expire keep the default.
    fn refresh(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Starts a login; on success `session()` carries a token.
    fn login(&self) -> BoxFuture<'_, Result<()>>;

    /// Ends the session; afterwards `session()` carries no token.
    fn logout(&self) -> BoxFuture<'_, Result<()>>;
}

/// Decodes the payload segment of a JWT into a claims object.
///
/// Signatures are not verified; the API does that.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    match serde_json::from_slice(&decoded).ok()? {
        Value::Object(claims) => Some(claims),
        _ => None,
    }
}

/// Returns a masked version of a token for display (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    if token.len() <= 16 {
        return "***".to_string();
    }
    match token.get(..12) {
        Some(prefix) => format!("{prefix}..."),
        None => "***".to_string(),
    }
}

/// Session backed by a fixed token.
///
/// `logout` drops the token; `login` restores the configured one.
#[derive(Debug, Default)]
pub struct StaticSession {
    configured: Option<String>,
    current: RwLock<Option<String>>,
}

impl StaticSession {
    pub fn new(token: Option<String>) -> Self {
        Self {
            current: RwLock::new(token.clone()),
            configured: token,
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self::new(Some(token.into()))
    }

    pub fn anonymous() -> Self {
        Self::new(None)
    }

    fn set(&self, token: Option<String>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

impl SessionProvider for StaticSession {
    fn session(&self) -> Session {
        let token = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Session::from_token(token)
    }

    fn login(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let Some(token) = self.configured.clone() else {
                anyhow::bail!("No token configured for this session");
            };
            self.set(Some(token));
            Ok(())
        })
    }

    fn logout(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.set(None);
            Ok(())
        })
    }
}
