//! Command-line arguments and their effect on the resolved configuration.

use std::path::PathBuf;

use clap::Parser;

use rovelink_core::config::{self, Config};

#[derive(Parser, Debug, Default)]
#[command(name = "rovelink")]
#[command(version, about = "Operator console for the rovelink device", long_about = None)]
pub struct Cli {
    /// Explicit config file (replaces the global one)
    #[arg(short, long, env = "ROVELINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Device host
    #[arg(long)]
    pub host: Option<String>,

    /// Device port
    #[arg(long)]
    pub port: Option<u16>,

    /// WebSocket path on the device
    #[arg(long)]
    pub path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Start without connecting; use `connect` at the prompt
    #[arg(long)]
    pub no_connect: bool,
}

impl Cli {
    /// Resolve configuration: files and environment, then flags on top.
    pub fn resolve_config(&self) -> rovelink_core::Result<Config> {
        let mut config = config::load_config(self.config.as_deref())?;
        self.apply_overrides(&mut config);
        Ok(config)
    }

    /// Apply flags that were given. Flags take precedence over every other
    /// source.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.endpoint.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.endpoint.port = port;
        }
        if let Some(path) = &self.path {
            config.endpoint.path.clone_from(path);
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if self.log_json {
            config.logging.json = true;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "rovelink",
            "--host",
            "10.0.0.5",
            "--port",
            "8080",
            "--log-level",
            "debug",
            "--no-connect",
        ])
        .unwrap();
        assert_eq!(cli.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(cli.port, Some(8080));
        assert!(cli.no_connect);
        assert!(!cli.log_json);
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert!(Cli::try_parse_from(["rovelink", "--port", "70000"]).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"endpoint": {"host": "192.168.0.50", "port": 81}, "logging": {"level": "warn"}}"#,
        )
        .unwrap();

        let cli = Cli {
            config: Some(path),
            port: Some(9000),
            log_json: true,
            ..Cli::default()
        };
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.endpoint.url(), "ws://192.168.0.50:9000/ws");
        assert!(config.logging.json);
    }

    #[test]
    fn no_flags_leave_config_untouched() {
        let mut config = Config::default();
        Cli::default().apply_overrides(&mut config);
        assert_eq!(config, Config::default());
    }
}
