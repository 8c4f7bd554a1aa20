//! Configuration resolution for rovelink.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/rovelink/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Complete rovelink configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The single device endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            // Access-point address of the device's onboard controller.
            host: "192.168.4.1".to_string(),
            port: 80,
            path: "/ws".to_string(),
        }
    }
}

impl EndpointConfig {
    /// WebSocket URL for this endpoint.
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("ws://{}:{}{}", self.host, self.port, path)
    }
}

/// Session timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Bounded wait for the transport to open.
    pub connect_timeout_ms: u64,
    /// Liveness probe interval while connected.
    pub heartbeat_interval_ms: u64,
    pub reconnect: ReconnectSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            reconnect: ReconnectSettings::default(),
        }
    }
}

/// Reconnect policy configuration. Defaults give a fixed delay with no cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5_000,
            max_delay_ms: 5_000,
            multiplier: 1.0,
            max_attempts: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit_file: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        config = load_config_file(&global_path)?;
        debug!(path = %global_path.display(), "Loaded global config");
    }

    // Load explicit config
    if let Some(path) = explicit_file {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        config = load_config_file(path)?;
        debug!(path = %path.display(), "Loaded config file");
    }

    // Apply environment overrides
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".rovelink").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/rovelink/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("rovelink").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Read a config file. Missing sections fall back to their defaults.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("ROVELINK_HOST") {
        config.endpoint.host = val;
    }
    if let Some(n) = lookup("ROVELINK_PORT").and_then(|v| v.parse().ok()) {
        config.endpoint.port = n;
    }
    if let Some(val) = lookup("ROVELINK_PATH") {
        config.endpoint.path = val;
    }
    if let Some(val) = lookup("ROVELINK_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(n) = lookup("ROVELINK_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.session.connect_timeout_ms = n;
    }
    if let Some(n) = lookup("ROVELINK_HEARTBEAT_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.session.heartbeat_interval_ms = n;
    }
    if let Some(n) = lookup("ROVELINK_RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
        config.session.reconnect.initial_delay_ms = n;
        config.session.reconnect.max_delay_ms = config.session.reconnect.max_delay_ms.max(n);
    }
}
