//! Client configuration management.
//!
//! This module handles loading the client configuration, which
//! names the API base URL, the fixed auth routes, and where the access token
//! is persisted between runs.
//!
//! Configuration is stored at `~/.config/nexus/config.json`. The
//! `NEXUS_API_BASE_URL` environment variable overrides `base_url`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "nexus";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable that overrides the configured API base URL
pub const BASE_URL_ENV: &str = "NEXUS_API_BASE_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where the access token survives process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Plain-text file in the cache directory
    #[default]
    File,
    /// OS keychain entry
    Keyring,
    /// Not persisted
    Memory,
}

/// Credential attached to the refresh call.
///
/// The backend decides how a refresh is authenticated; this subsystem only
/// chooses whether to present the current bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefreshCredential {
    /// Send no Authorization header
    #[default]
    None,
    /// Send the currently held token as a bearer header
    Bearer,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    pub profile_path: String,
    pub request_timeout_secs: u64,
    pub storage: StorageBackend,
    pub refresh_credential: RefreshCredential,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_path: "/login".to_string(),
            refresh_path: "/api/v1/auth/refresh/".to_string(),
            logout_path: "/api/v1/auth/logout".to_string(),
            profile_path: "/api/v1/users/me/".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            storage: StorageBackend::default(),
            refresh_credential: RefreshCredential::default(),
        }
    }
}

impl Config {
    /// Load the config file (or defaults), then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Join an endpoint path onto the base URL
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), endpoint)
    }
}
