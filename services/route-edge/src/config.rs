//! Configuration types and loading
//!
//! Config precedence: `--config` > `CONFIG_PATH` > `condo-route-edge.toml`.
//! Route lists default to the session library's guard defaults.

use serde::Deserialize;
use session_auth::RouteGuardConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub edge: EdgeConfig,
    #[serde(default)]
    pub routes: RouteGuardConfig,
}

/// Listener and upstream settings
#[derive(Debug, Deserialize)]
pub struct EdgeConfig {
    pub listen_addr: SocketAddr,
    /// The web app the edge fronts
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        if !config.edge.upstream_url.starts_with("http://")
            && !config.edge.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                config.edge.upstream_url
            )));
        }

        if config.edge.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.edge.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        config
            .routes
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("condo-route-edge.toml")
    }
}
