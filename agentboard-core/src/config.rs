//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/agentboard/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/agentboard/` (~/.config/agentboard/)
//! - State/Logs: `$XDG_STATE_HOME/agentboard/` (~/.local/state/agentboard/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `server.auth_token`
pub const AUTH_TOKEN_ENV: &str = "AGENTBOARD_TOKEN";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Task API server
    #[serde(default)]
    pub server: ServerConfig,

    /// Live stream and polling behaviour
    #[serde(default)]
    pub stream: StreamConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Task API server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Base URL of the task API (e.g., `http://localhost:3000/api`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Token appended to stream URLs and sent as a bearer token (can also use env var)
    pub auth_token: Option<String>,

    /// HTTP request timeout in seconds for snapshot requests
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl ServerConfig {
    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Resolve the auth token, preferring the environment over the config file
    pub fn auth_token(&self) -> Option<String> {
        std::env::var(AUTH_TOKEN_ENV)
            .ok()
            .filter(|token| !token.is_empty())
            .or_else(|| self.auth_token.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(Error::Config("server.base_url must not be empty".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "server.base_url must be an http(s) URL, got {:?}",
                url
            )));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Live stream configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Fixed delay before a reconnect attempt after a transport error
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Consecutive failed attempts before giving up (0 = never give up)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Snapshot re-fetch interval while a task is in a poll-worthy status
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Retry cap, or `None` when retries are unbounded
    pub fn attempt_cap(&self) -> Option<u32> {
        (self.max_reconnect_attempts > 0).then_some(self.max_reconnect_attempts)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_delay_secs == 0 {
            return Err(Error::Config(
                "stream.reconnect_delay_secs must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config(
                "stream.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_reconnect_delay() -> u64 {
    3
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_poll_interval() -> u64 {
    3
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.stream.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/agentboard/config.toml` (~/.config/agentboard/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("agentboard").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/agentboard/` (~/.local/state/agentboard/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("agentboard")
    }
}
