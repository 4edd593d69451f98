//! Configuration management for the ShellBridge daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/shellbridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("listen address is not valid: {0}")]
    InvalidListenAddr(String),

    #[error("endpoint must start with '/', got {0}")]
    InvalidEndpoint(String),

    #[error("pty dimensions must be non-zero, got {0}x{1}")]
    InvalidPtySize(u16, u16),

    #[error("grace_period_secs must be between 1 and 300, got {0}")]
    InvalidGracePeriod(u64),

    #[error("output_buffer must be between 1 and 4096, got {0}")]
    InvalidOutputBuffer(usize),

    #[error("shell path does not exist: {0}")]
    InvalidShellPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the ShellBridge daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener configuration.
    pub server: ServerConfig,

    /// Per-session shell and terminal configuration.
    pub session: SessionConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port the WebSocket listener binds to.
    pub listen: String,

    /// Request path that accepts connection upgrades.
    pub endpoint: String,

    /// Maximum number of concurrent sessions (0 = unlimited).
    pub max_sessions: usize,
}

/// Per-session shell and terminal configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell command spawned for each session.
    pub shell: String,

    /// TERM value exported to the shell.
    pub term: String,

    /// Initial pseudo-terminal width in columns.
    pub cols: u16,

    /// Initial pseudo-terminal height in rows.
    pub rows: u16,

    /// Seconds to wait after a graceful termination request before a
    /// forceful kill is issued.
    pub grace_period_secs: u64,

    /// Depth of the bounded queue between the shell's output and the
    /// connection. When full, the output pump blocks; output is never
    /// dropped.
    pub output_buffer: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            endpoint: "/shell".to_string(),
            max_sessions: 0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            term: "xterm-color".to_string(),
            cols: 80,
            rows: 30,
            grace_period_secs: 5,
            output_buffer: 64,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shellbridge")
        .join("config.toml")
}

/// Returns the default shell for the current platform.
fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SHELLBRIDGE_LISTEN: Override the listen address
    /// - SHELLBRIDGE_SHELL: Override the spawned shell
    /// - SHELLBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("SHELLBRIDGE_LISTEN") {
            if !listen.is_empty() {
                tracing::info!("Overriding listen address from environment: {}", listen);
                self.server.listen = listen;
            }
        }

        if let Ok(shell) = std::env::var("SHELLBRIDGE_SHELL") {
            if !shell.is_empty() {
                tracing::info!("Overriding shell from environment: {}", shell);
                self.session.shell = shell;
            }
        }

        if let Ok(level) = std::env::var("SHELLBRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.log.level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate listen address parses as a socket address
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(self.server.listen.clone()));
        }

        // Validate endpoint is an absolute request path
        if !self.server.endpoint.starts_with('/') {
            return Err(ConfigError::InvalidEndpoint(self.server.endpoint.clone()));
        }

        // Validate pty dimensions
        if self.session.cols == 0 || self.session.rows == 0 {
            return Err(ConfigError::InvalidPtySize(
                self.session.cols,
                self.session.rows,
            ));
        }

        // Validate grace period: 1-300 seconds
        if self.session.grace_period_secs < 1 || self.session.grace_period_secs > 300 {
            return Err(ConfigError::InvalidGracePeriod(
                self.session.grace_period_secs,
            ));
        }

        // Validate output buffer: 1-4096 chunks
        if self.session.output_buffer < 1 || self.session.output_buffer > 4096 {
            return Err(ConfigError::InvalidOutputBuffer(self.session.output_buffer));
        }

        // Validate shell path exists
        let shell_path = std::path::Path::new(&self.session.shell);

        if shell_path.is_absolute() {
            if !shell_path.exists() {
                return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
            }
        } else {
            // For non-absolute paths, try to find in PATH
            if which::which(&self.session.shell).is_err() {
                return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
            }
        }

        // Validate log_level is a known value
        let level = self.log.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }

        Ok(())
    }

    /// Returns the grace period as a [`Duration`].
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.session.grace_period_secs)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.listen, "127.0.0.1:3000");
        assert_eq!(config.server.endpoint, "/shell");
        assert_eq!(config.server.max_sessions, 0);
        assert_eq!(config.session.cols, 80);
        assert_eq!(config.session.rows, 30);
        assert_eq!(config.session.grace_period_secs, 5);
        assert_eq!(config.session.output_buffer, 64);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_default_shell() {
        let shell = default_shell();
        assert!(!shell.is_empty());
        if cfg!(windows) {
            assert!(shell.contains("powershell"));
        }
    }

    #[test]
    fn test_grace_period_duration() {
        let mut config = Config::default();
        config.session.grace_period_secs = 7;
        assert_eq!(config.grace_period(), Duration::from_secs(7));
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
listen = "0.0.0.0:8022"

[log]
level = "debug"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:8022");
        assert_eq!(config.log.level, "debug");
        // Other values should be defaults
        assert_eq!(config.server.endpoint, "/shell");
        assert_eq!(config.session.cols, 80);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
listen = "127.0.0.1:9000"
endpoint = "/terminal"
max_sessions = 16

[session]
shell = "/bin/sh"
term = "xterm-256color"
cols = 120
rows = 40
grace_period_secs = 10
output_buffer = 128

[log]
level = "trace"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.endpoint, "/terminal");
        assert_eq!(config.server.max_sessions, 16);
        assert_eq!(config.session.shell, "/bin/sh");
        assert_eq!(config.session.term, "xterm-256color");
        assert_eq!(config.session.cols, 120);
        assert_eq!(config.session.rows, 40);
        assert_eq!(config.session.grace_period_secs, 10);
        assert_eq!(config.session.output_buffer, 128);
        assert_eq!(config.log.level, "trace");
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[server
listen = "127.0.0.1:3000"
"#;
        let result = Config::from_toml(toml);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[session]
cols = "not a number"
"#;
        let result = Config::from_toml(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();

        assert!(toml.contains("[server]"));
        assert!(toml.contains("[session]"));
        assert!(toml.contains("[log]"));
    }

    #[test]
    fn test_roundtrip() {
        let original = Config::default();
        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.server.listen = "0.0.0.0:4000".to_string();
        original.server.max_sessions = 3;
        original.session.grace_period_secs = 30;
        original.log.level = "warn".to_string();

        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut original = Config::default();
        original.log.level = "debug".to_string();
        original.session.rows = 50;

        original.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_save_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir
            .path()
            .join("nested")
            .join("dirs")
            .join("config.toml");

        let config = Config::default();
        config.save(&config_path).unwrap();

        assert!(config_path.exists());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, "invalid [ toml").unwrap();

        let result = Config::load(&config_path);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("shellbridge"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_override_listen() {
        std::env::set_var("SHELLBRIDGE_LISTEN", "0.0.0.0:9999");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.listen, "0.0.0.0:9999");

        std::env::remove_var("SHELLBRIDGE_LISTEN");
    }

    #[test]
    #[serial]
    fn test_env_override_shell() {
        std::env::set_var("SHELLBRIDGE_SHELL", "/bin/dash");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.session.shell, "/bin/dash");

        std::env::remove_var("SHELLBRIDGE_SHELL");
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::set_var("SHELLBRIDGE_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.log.level, "debug");

        std::env::remove_var("SHELLBRIDGE_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("SHELLBRIDGE_LISTEN", "");

        let mut config = Config::default();
        let original_listen = config.server.listen.clone();

        config.apply_env_overrides();

        assert_eq!(config.server.listen, original_listen);

        std::env::remove_var("SHELLBRIDGE_LISTEN");
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        std::env::remove_var("SHELLBRIDGE_LISTEN");
        std::env::remove_var("SHELLBRIDGE_SHELL");
        std::env::remove_var("SHELLBRIDGE_LOG_LEVEL");

        let mut config = Config::default();
        let original = config.clone();

        config.apply_env_overrides();

        assert_eq!(config, original);
    }

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_listen_addr() {
        let mut config = Config::default();
        config.server.listen = "not-an-address".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidListenAddr("not-an-address".to_string()))
        );
    }

    #[test]
    fn test_validate_listen_addr_requires_port() {
        let mut config = Config::default();
        config.server.listen = "127.0.0.1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_endpoint() {
        let mut config = Config::default();
        config.server.endpoint = "shell".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint("shell".to_string()))
        );
    }

    #[test]
    fn test_validate_zero_cols() {
        let mut config = Config::default();
        config.session.cols = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPtySize(0, 30)));
    }

    #[test]
    fn test_validate_zero_rows() {
        let mut config = Config::default();
        config.session.rows = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPtySize(80, 0)));
    }

    #[test]
    fn test_validate_grace_period_bounds() {
        let mut config = Config::default();

        config.session.grace_period_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidGracePeriod(0)));

        config.session.grace_period_secs = 301;
        assert_eq!(config.validate(), Err(ConfigError::InvalidGracePeriod(301)));

        config.session.grace_period_secs = 1;
        assert!(config.validate().is_ok());

        config.session.grace_period_secs = 300;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_output_buffer_bounds() {
        let mut config = Config::default();

        config.session.output_buffer = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidOutputBuffer(0)));

        config.session.output_buffer = 4097;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidOutputBuffer(4097))
        );

        config.session.output_buffer = 1;
        assert!(config.validate().is_ok());

        config.session.output_buffer = 4096;
        assert!(config.validate().is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn test_validate_shell_path_absolute_exists() {
        let mut config = Config::default();
        config.session.shell = "/bin/sh".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_shell_path_absolute_not_exists() {
        let mut config = Config::default();
        config.session.shell = "/nonexistent/path/to/shell".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidShellPath(
                "/nonexistent/path/to/shell".to_string()
            ))
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_validate_shell_path_in_path() {
        let mut config = Config::default();
        config.session.shell = "sh".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_shell_path_not_in_path() {
        let mut config = Config::default();
        config.session.shell = "nonexistent_shell_xyz".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidShellPath(
                "nonexistent_shell_xyz".to_string()
            ))
        );
    }

    #[test]
    fn test_validate_log_levels() {
        let mut config = Config::default();

        for level in ["trace", "debug", "info", "warn", "error"] {
            config.log.level = level.to_string();
            assert!(config.validate().is_ok(), "level {} should be valid", level);
        }
    }

    #[test]
    fn test_validate_log_level_case_insensitive() {
        let mut config = Config::default();
        config.log.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level_invalid() {
        let mut config = Config::default();
        config.log.level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }
}
