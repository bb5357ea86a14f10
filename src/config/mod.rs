//! Gateway configuration
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (--config flag, `~/.ccproxy/config.toml`, or `./ccproxy.toml`)
//! 3. Built-in defaults (lowest priority)
//!
//! The request pipeline never reads files or environment variables itself;
//! it consumes the realized `Config` produced here.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod performance;
mod providers;
mod routes;

#[cfg(test)]
mod tests;

pub use performance::{PerformanceConfig, RetryConfig, DEFAULT_MAX_REQUEST_BODY_SIZE};
pub use providers::{MessageFormat, ProviderConfig, TransformerRef};
pub use routes::{RouteTarget, RoutesConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// The `[log]` section
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Filter directive (e.g. "info", "ccproxy=debug")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Also write to this file (daily rotation)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Realized gateway configuration, read-only after startup
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind (forced to loopback when no API key is set)
    pub host: String,

    /// Port to bind
    pub port: u16,

    /// Gateway API key; `None` restricts access to localhost
    pub api_key: Option<String>,

    /// Outbound proxy URL; falls back to the HTTPS_PROXY family at startup
    pub proxy_url: Option<String>,

    /// Seconds to wait for in-flight requests on shutdown
    pub shutdown_timeout_secs: u64,

    /// Logging configuration
    pub log: LogConfig,

    /// Timeouts, caps, retry, breaker
    pub performance: PerformanceConfig,

    /// Provider backends by name
    pub providers: HashMap<String, ProviderConfig>,

    /// Routing table
    pub routes: RoutesConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_key: Option<String>,
    pub proxy_url: Option<String>,
    pub shutdown_timeout_secs: Option<u64>,

    #[serde(default)]
    pub log: Option<LogConfig>,

    #[serde(default)]
    pub performance: Option<PerformanceConfig>,

    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    pub routes: RoutesConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Default config file locations, checked in order
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".ccproxy").join("config.toml"));
        }
        paths.push(PathBuf::from("ccproxy.toml"));
        paths
    }

    /// Load configuration from an explicit path or the default locations,
    /// then apply environment overrides
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(p) => p.to_path_buf(),
            None => Self::default_paths()
                .into_iter()
                .find(|p| p.exists())
                .context(
                    "no configuration file found; create ~/.ccproxy/config.toml or pass --config",
                )?,
        };

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let file: FileConfig = toml::from_str(&contents)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;

        let config = Self::from_file(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from a parsed file, layering environment overrides on top
    pub(crate) fn from_file(file: FileConfig) -> Result<Self> {
        // Host/port: env > file > default
        let host = std::env::var("CCPROXY_HOST")
            .ok()
            .or(file.host)
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let port = match std::env::var("CCPROXY_PORT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("CCPROXY_PORT '{}' is not a valid port", raw))?,
            Err(_) => file.port.unwrap_or(3456),
        };

        // API key: env > file
        let api_key = std::env::var("CCPROXY_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or(file.api_key);

        // Proxy URL: file > HTTPS_PROXY family; consulted at startup only
        let proxy_url = file
            .proxy_url
            .or_else(|| std::env::var("HTTPS_PROXY").ok())
            .or_else(|| std::env::var("https_proxy").ok())
            .filter(|p| !p.is_empty());

        let mut log = file.log.unwrap_or_default();
        if let Ok(level) = std::env::var("CCPROXY_LOG") {
            if !level.is_empty() {
                log.level = level;
            }
        }

        Ok(Self {
            host,
            port,
            api_key,
            proxy_url,
            shutdown_timeout_secs: file.shutdown_timeout_secs.unwrap_or(10),
            log,
            performance: file.performance.unwrap_or_default(),
            providers: file.providers,
            routes: file.routes,
        })
    }

    /// The socket address to bind
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    /// Check cross-section invariants: provider fields, and every route
    /// target naming a configured provider
    pub fn validate(&self) -> Result<()> {
        for (name, provider) in &self.providers {
            if let Err(msg) = provider.validate(name) {
                bail!("{}", msg);
            }
        }

        for target in self.routes.all_targets() {
            if !self.providers.contains_key(&target.provider) {
                bail!(
                    "route target '{},{}' names unknown provider '{}'",
                    target.provider,
                    target.model,
                    target.provider
                );
            }
        }

        Ok(())
    }
}
