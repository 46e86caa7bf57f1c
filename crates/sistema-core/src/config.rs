//! Configuration management for Sistema.
//!
//! Loads configuration from ${SISTEMA_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding `[api].base_url`.
pub const API_URL_ENV: &str = "SISTEMA_API_URL";

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for Sistema configuration and data files.
    //!
    //! SISTEMA_HOME resolution order:
    //! 1. SISTEMA_HOME environment variable (if set)
    //! 2. ~/.config/sistema (default)

    use std::path::PathBuf;

    /// Returns the Sistema home directory.
    pub fn sistema_home() -> PathBuf {
        if let Ok(home) = std::env::var("SISTEMA_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".sistema"),
            |h| h.join(".config").join("sistema"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        sistema_home().join("config.toml")
    }

    /// Returns the default log file path.
    pub fn log_path() -> PathBuf {
        sistema_home().join("logs").join("sistema.log")
    }
}

/// Remote notes API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the notes API
    pub base_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Retry budget for idempotent requests
    pub max_retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout_secs: 10,
            max_retries: 1,
        }
    }
}

/// Policy applied when the refresh token is no longer accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefreshExpiredPolicy {
    /// Start the login flow again
    #[default]
    Login,
    /// Drop the session
    Logout,
}

/// OpenID Connect client settings.
///
/// Consumed as-is by the auth boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub client_id: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub logout_endpoint: String,
    pub redirect_uri: String,
    pub scope: String,
    pub on_refresh_expire: RefreshExpiredPolicy,
    pub auto_login: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        const REALM: &str = "http://localhost:8080/realms/myrealm/protocol/openid-connect";
        Self {
            client_id: "oauth-front-a".to_string(),
            authorization_endpoint: format!("{REALM}/auth"),
            token_endpoint: format!("{REALM}/token"),
            logout_endpoint: format!("{REALM}/logout"),
            redirect_uri: "http://localhost:5173".to_string(),
            scope: "openid profile email offline_access".to_string(),
            on_refresh_expire: RefreshExpiredPolicy::Login,
            auto_login: false,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive
    pub level: String,
    /// Log file (defaults to `<home>/logs/sistema.log`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub log: LogConfig,
}

impl Config {
    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    ///
    /// # Errors
    /// Returns an error if the file exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Resolves the API base URL with precedence: env > config.
    ///
    /// # Errors
    /// Returns an error if the resolved URL is malformed.
    pub fn effective_base_url(&self) -> Result<String> {
        let env_url = std::env::var(API_URL_ENV).ok();
        resolve_base_url(env_url.as_deref(), &self.api.base_url)
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs.max(1))
    }

    /// Log file location.
    pub fn log_file(&self) -> PathBuf {
        self.log.file.clone().unwrap_or_else(paths::log_path)
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to move {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;
        Ok(())
    }
}

/// Picks the first non-blank URL among the override and the configured value.
fn resolve_base_url(override_url: Option<&str>, config_url: &str) -> Result<String> {
    let chosen = override_url
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| config_url.trim());

    url::Url::parse(chosen).with_context(|| format!("Invalid API base URL: {chosen}"))?;
    Ok(chosen.trim_end_matches('/').to_string())
}
