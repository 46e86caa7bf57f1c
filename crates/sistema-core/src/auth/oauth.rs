//! OpenID Connect token plumbing: PKCE, token endpoint calls and the
//! on-disk credential cache.
//!
//! Stores tokens in `<base>/oauth.json` with restricted permissions (0600),
//! keyed by client id. Tokens are never logged or displayed in full.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{AuthConfig, paths};

/// OAuth token cache filename.
const OAUTH_CACHE_FILE: &str = "oauth.json";

/// Access tokens are treated as expired this long before their real expiry.
const EXPIRY_SKEW_MS: u64 = 30 * 1000;

fn now_millis_u64() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(u64::MAX)
}

/// Cached credentials for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredentials {
    /// The access token (short-lived)
    pub access: String,
    /// The refresh token, when the server issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    /// The ID token, kept for logout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Expiry timestamp in milliseconds since epoch
    pub expires: u64,
}

impl OAuthCredentials {
    /// Returns true if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        now_millis_u64() >= self.expires
    }
}

/// OAuth token cache structure.
/// Maps client ids to their credentials.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OAuthCache {
    #[serde(flatten)]
    pub clients: HashMap<String, OAuthCredentials>,
}

impl OAuthCache {
    /// Returns the default path of the OAuth cache file.
    pub fn cache_path() -> PathBuf {
        paths::sistema_home().join(OAUTH_CACHE_FILE)
    }

    /// Loads the cache from `path`.
    /// Returns an empty cache if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read OAuth cache from {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse OAuth cache from {}", path.display()))
    }

    /// Saves the cache to `path` with restricted permissions (0600).
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize OAuth cache")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)
                .with_context(|| format!("Failed to open {} for writing", path.display()))?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(path, contents)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }

        Ok(())
    }

    pub fn get(&self, client_id: &str) -> Option<&OAuthCredentials> {
        self.clients.get(client_id)
    }

    pub fn set(&mut self, client_id: &str, creds: OAuthCredentials) {
        self.clients.insert(client_id.to_string(), creds);
    }

    pub fn remove(&mut self, client_id: &str) -> Option<OAuthCredentials> {
        self.clients.remove(client_id)
    }
}

/// PKCE code verifier and challenge
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

/// Generate PKCE code verifier and S256 challenge
pub fn generate_pkce() -> Pkce {
    // Two v4 UUIDs give 32 random bytes
    let uuid1 = uuid::Uuid::new_v4();
    let uuid2 = uuid::Uuid::new_v4();
    let mut verifier_bytes = [0u8; 32];
    verifier_bytes[..16].copy_from_slice(uuid1.as_bytes());
    verifier_bytes[16..].copy_from_slice(uuid2.as_bytes());
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    Pkce {
        challenge: challenge_for(&verifier),
        verifier,
    }
}

fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Build the authorization URL for the configured provider.
pub fn build_auth_url(config: &AuthConfig, pkce: &Pkce, state: &str) -> String {
    let params = [
        ("response_type", "code"),
        ("client_id", config.client_id.as_str()),
        ("redirect_uri", config.redirect_uri.as_str()),
        ("scope", config.scope.as_str()),
        ("code_challenge", pkce.challenge.as_str()),
        ("code_challenge_method", "S256"),
        ("state", state),
    ];

    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();

    let separator = if config.authorization_endpoint.contains('?') {
        '&'
    } else {
        '?'
    };
    format!("{}{separator}{query}", config.authorization_endpoint)
}

/// Parses a pasted authorization input into code + optional state.
///
/// Accepts a full redirect URL, a `code=..&state=..` query, `code#state`,
/// or a bare code.
pub fn parse_authorization_input(input: &str) -> (Option<String>, Option<String>) {
    let value = input.trim();
    if value.is_empty() {
        return (None, None);
    }

    if let Ok(url) = url::Url::parse(value) {
        let code = url.query_pairs().find(|(k, _)| k == "code").map(|(_, v)| v);
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v);
        return (code.map(|v| v.to_string()), state.map(|v| v.to_string()));
    }

    if let Some((code, state)) = value.split_once('#') {
        return (Some(code.to_string()), Some(state.to_string()));
    }

    if value.contains("code=") {
        let params = url::form_urlencoded::parse(value.trim_start_matches('?').as_bytes())
            .collect::<Vec<_>>();
        let code = params.iter().find(|(k, _)| k == "code").map(|(_, v)| v);
        let state = params.iter().find(|(k, _)| k == "state").map(|(_, v)| v);
        return (
            code.map(std::string::ToString::to_string),
            state.map(std::string::ToString::to_string),
        );
    }

    (Some(value.to_string()), None)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    expires_in: u64,
}

impl TokenResponse {
    fn into_credentials(self, previous_refresh: Option<&str>) -> OAuthCredentials {
        OAuthCredentials {
            expires: compute_expires_at(self.expires_in),
            refresh: self
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            id_token: self.id_token,
            access: self.access_token,
        }
    }
}

fn compute_expires_at(expires_in_secs: u64) -> u64 {
    let now = now_millis_u64();
    now.saturating_add(expires_in_secs.saturating_mul(1000).saturating_sub(EXPIRY_SKEW_MS))
}

async fn post_token_form(
    http: &reqwest::Client,
    config: &AuthConfig,
    form: String,
    what: &str,
) -> Result<TokenResponse> {
    let response = http
        .post(&config.token_endpoint)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(form)
        .send()
        .await
        .with_context(|| format!("Failed to send {what} request"))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{what} failed (HTTP {status}): {body}");
    }

    response
        .json()
        .await
        .context("Failed to parse token response")
}

/// Exchanges an authorization code for tokens.
///
/// # Errors
/// Returns an error if the token endpoint is unreachable or rejects the code.
pub async fn exchange_code(
    http: &reqwest::Client,
    config: &AuthConfig,
    code: &str,
    pkce: &Pkce,
) -> Result<OAuthCredentials> {
    let form = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("grant_type", "authorization_code")
        .append_pair("client_id", &config.client_id)
        .append_pair("code", code)
        .append_pair("code_verifier", &pkce.verifier)
        .append_pair("redirect_uri", &config.redirect_uri)
        .finish();

    let token = post_token_form(http, config, form, "Token exchange").await?;
    Ok(token.into_credentials(None))
}

/// Refreshes an expired access token.
///
/// # Errors
/// Returns an error if the token endpoint is unreachable or rejects the refresh token.
pub async fn refresh_token(
    http: &reqwest::Client,
    config: &AuthConfig,
    refresh_token: &str,
) -> Result<OAuthCredentials> {
    let form = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("grant_type", "refresh_token")
        .append_pair("client_id", &config.client_id)
        .append_pair("refresh_token", refresh_token)
        .finish();

    let token = post_token_form(http, config, form, "Token refresh").await?;
    Ok(token.into_credentials(Some(refresh_token)))
}

/// Ends the server-side session for a refresh token.
///
/// # Errors
/// Returns an error if the logout endpoint is unreachable or answers non-2xx.
pub async fn end_session(
    http: &reqwest::Client,
    config: &AuthConfig,
    refresh_token: &str,
) -> Result<()> {
    let form = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", &config.client_id)
        .append_pair("refresh_token", refresh_token)
        .finish();

    let response = http
        .post(&config.logout_endpoint)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(form)
        .send()
        .await
        .context("Failed to send logout request")?;

    if !response.status().is_success() {
        anyhow::bail!("Logout failed (HTTP {})", response.status());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn creds(access: &str, expires: u64) -> OAuthCredentials {
        OAuthCredentials {
            access: access.to_string(),
            refresh: Some("refresh".to_string()),
            id_token: None,
            expires,
        }
    }

    #[test]
    fn test_credentials_expiry() {
        let now = now_millis_u64();
        assert!(creds("a", now - 1000).is_expired());
        assert!(!creds("a", now + 60_000).is_expired());
    }

    #[test]
    fn test_expiry_saturates_on_huge_lifetimes() {
        assert_eq!(compute_expires_at(u64::MAX), u64::MAX);
        assert!(compute_expires_at(0) <= now_millis_u64());

        let in_five_minutes = compute_expires_at(300);
        let expected = now_millis_u64() + 300_000 - EXPIRY_SKEW_MS;
        assert!(in_five_minutes.abs_diff(expected) < 5_000);
    }

    #[test]
    fn test_oauth_cache_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("oauth.json");

        let mut cache = OAuthCache::default();
        cache.set("oauth-front-a", creds("access-token", 1_234_567_890_000));
        cache.save_to(&path).unwrap();

        let loaded = OAuthCache::load_from(&path).unwrap();
        assert_eq!(
            loaded.get("oauth-front-a"),
            Some(&creds("access-token", 1_234_567_890_000))
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_oauth_cache_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let cache = OAuthCache::load_from(&dir.path().join("oauth.json")).unwrap();
        assert!(cache.clients.is_empty());
    }

    #[test]
    fn test_pkce_challenge_is_s256_of_verifier() {
        let pkce = generate_pkce();
        assert_eq!(pkce.verifier.len(), 43);
        assert_eq!(pkce.challenge, challenge_for(&pkce.verifier));
        // RFC 7636 appendix B
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_auth_url_contains_required_parameters() {
        let config = AuthConfig::default();
        let pkce = generate_pkce();
        let url = build_auth_url(&config, &pkce, "xyz");

        assert!(url.starts_with(
            "http://localhost:8080/realms/myrealm/protocol/openid-connect/auth?"
        ));
        let parsed = url::Url::parse(&url).unwrap();
        let query: HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "oauth-front-a");
        assert_eq!(query["redirect_uri"], "http://localhost:5173");
        assert_eq!(query["scope"], "openid profile email offline_access");
        assert_eq!(query["code_challenge"], pkce.challenge);
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["state"], "xyz");
    }

    #[test]
    fn test_parse_authorization_input_forms() {
        assert_eq!(
            parse_authorization_input("http://localhost:5173/?state=s1&code=c1"),
            (Some("c1".to_string()), Some("s1".to_string()))
        );
        assert_eq!(
            parse_authorization_input("code=c2&state=s2"),
            (Some("c2".to_string()), Some("s2".to_string()))
        );
        assert_eq!(
            parse_authorization_input("c3#s3"),
            (Some("c3".to_string()), Some("s3".to_string()))
        );
        assert_eq!(
            parse_authorization_input("  c4 \n"),
            (Some("c4".to_string()), None)
        );
        assert_eq!(parse_authorization_input("   "), (None, None));
    }

    #[tokio::test]
    async fn test_exchange_code_posts_pkce_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "id_token": "new-id",
                "expires_in": 300
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = AuthConfig {
            token_endpoint: format!("{}/token", server.uri()),
            ..AuthConfig::default()
        };
        let creds = exchange_code(&reqwest::Client::new(), &config, "the-code", &generate_pkce())
            .await
            .unwrap();

        assert_eq!(creds.access, "new-access");
        assert_eq!(creds.refresh.as_deref(), Some("new-refresh"));
        assert_eq!(creds.id_token.as_deref(), Some("new-id"));
        assert!(!creds.is_expired());
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 300
            })))
            .mount(&server)
            .await;

        let config = AuthConfig {
            token_endpoint: format!("{}/token", server.uri()),
            ..AuthConfig::default()
        };
        let creds = refresh_token(&reqwest::Client::new(), &config, "old-refresh")
            .await
            .unwrap();
        assert_eq!(creds.access, "fresh");
        assert_eq!(creds.refresh.as_deref(), Some("old-refresh"));
    }

    #[tokio::test]
    async fn test_token_endpoint_rejection_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let config = AuthConfig {
            token_endpoint: format!("{}/token", server.uri()),
            ..AuthConfig::default()
        };
        let err = refresh_token(&reqwest::Client::new(), &config, "stale")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_exchange_code_accepts_unbounded_expires_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a",
                "expires_in": u64::MAX
            })))
            .mount(&server)
            .await;

        let config = AuthConfig {
            token_endpoint: format!("{}/token", server.uri()),
            ..AuthConfig::default()
        };
        let creds = exchange_code(&reqwest::Client::new(), &config, "the-code", &generate_pkce())
            .await
            .unwrap();

        assert_eq!(creds.access, "a");
        assert_eq!(creds.expires, u64::MAX);
        assert!(!creds.is_expired());
    }
}
