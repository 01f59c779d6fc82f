//! Session configuration
//!
//! Loaded from TOML. Only `[api] base_url` is required; `CONDO_API_URL`
//! overrides it so one config file can serve several environments.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::constants::{PRESENCE_COOKIE_MAX_AGE_SECS, REGISTERED_COOKIE_MAX_AGE_SECS};
use crate::guard::RouteGuardConfig;

/// Env var overriding `api.base_url`
pub const API_URL_ENV: &str = "CONDO_API_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cookies: CookieConfig,
    #[serde(default)]
    pub routes: RouteGuardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Attempts for login and refresh, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

/// Where the profile cache lives. Memory-only when `path` is unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_registered_max_age")]
    pub registered_max_age_secs: u64,
    #[serde(default = "default_presence_max_age")]
    pub presence_max_age_secs: u64,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            registered_max_age_secs: default_registered_max_age(),
            presence_max_age_secs: default_presence_max_age(),
        }
    }
}

fn default_timeout() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    250
}

fn default_registered_max_age() -> u64 {
    REGISTERED_COOKIE_MAX_AGE_SECS
}

fn default_presence_max_age() -> u64 {
    PRESENCE_COOKIE_MAX_AGE_SECS
}

impl SessionConfig {
    /// Load from a TOML file, apply the env override and validate.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> common::Result<Self> {
        let mut config: SessionConfig = toml::from_str(contents)?;

        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.api.base_url = url;
        }

        config.api_url()?;

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }

        if config.api.max_attempts == 0 {
            return Err(common::Error::Config(
                "api.max_attempts must be greater than 0".into(),
            ));
        }

        config
            .routes
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;

        Ok(config)
    }

    /// The API base URL, parsed. Must be http(s) with a host.
    pub fn api_url(&self) -> common::Result<Url> {
        let url = Url::parse(&self.api.base_url).map_err(|e| {
            common::Error::Config(format!("api.base_url {:?} is invalid: {e}", self.api.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(common::Error::Config(format!(
                "api.base_url must be an http:// or https:// URL, got: {}",
                self.api.base_url
            )));
        }
        Ok(url)
    }
}
