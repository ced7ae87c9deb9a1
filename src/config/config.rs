//! Configuration management for the Arcade Harness

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Default functions for serde
fn default_host() -> String {
    crate::DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    crate::DEFAULT_PORT
}

fn default_games_root() -> PathBuf {
    PathBuf::from("src")
}

fn default_log_root() -> PathBuf {
    PathBuf::from("logs")
}

fn default_true() -> bool {
    true
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_capacity() -> usize {
    100
}

fn default_status_log_tail() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarnessConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Where games live and where their events are journaled
    #[serde(default)]
    pub games: GamesConfig,
    /// Process supervision settings
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Game folder locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamesConfig {
    /// Directory whose subdirectories are the runnable games
    #[serde(default = "default_games_root")]
    pub root: PathBuf,
    /// Launch configuration file; defaults to `<root>/runners.json`
    #[serde(default)]
    pub runners_file: Option<PathBuf>,
    /// Root of the per-folder `game-events.jsonl` journals
    #[serde(default = "default_log_root")]
    pub log_root: PathBuf,
}

impl Default for GamesConfig {
    fn default() -> Self {
        Self {
            root: default_games_root(),
            runners_file: None,
            log_root: default_log_root(),
        }
    }
}

impl GamesConfig {
    /// Resolved path of runners.json
    pub fn runners_path(&self) -> PathBuf {
        self.runners_file
            .clone()
            .unwrap_or_else(|| self.root.join(crate::RUNNERS_FILE_NAME))
    }
}

/// Process supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Kill whatever listens on a folder's port before starting it
    #[serde(default = "default_true")]
    pub reclaim_ports: bool,
    /// Grace period between the polite and the forceful termination signal
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    /// Per-folder log ring buffer size
    #[serde(default = "default_capacity")]
    pub log_capacity: usize,
    /// Per-folder in-memory event buffer size
    #[serde(default = "default_capacity")]
    pub event_capacity: usize,
    /// Number of log entries included in `/api/status/:name`
    #[serde(default = "default_status_log_tail")]
    pub status_log_tail: usize,
    /// Stop a folder's process when its directory disappears
    #[serde(default = "default_true")]
    pub watch_folders: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reclaim_ports: true,
            stop_timeout_secs: default_stop_timeout(),
            log_capacity: default_capacity(),
            event_capacity: default_capacity(),
            status_log_tail: default_status_log_tail(),
            watch_folders: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Overrides coming from the command line (highest precedence)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub games_root: Option<PathBuf>,
    pub log_root: Option<PathBuf>,
    pub no_reclaim_ports: bool,
}

/// Environment variable names read by the harness
pub struct EnvVars;

impl EnvVars {
    pub const HOST: &'static str = "HARNESS_HOST";
    pub const PORT: &'static str = "HARNESS_PORT";
    pub const GAMES_ROOT: &'static str = "HARNESS_GAMES_ROOT";
    pub const RUNNERS_FILE: &'static str = "HARNESS_RUNNERS_FILE";
    pub const LOG_ROOT: &'static str = "HARNESS_LOG_ROOT";
    pub const RECLAIM_PORTS: &'static str = "HARNESS_RECLAIM_PORTS";
    pub const STOP_TIMEOUT_SECS: &'static str = "HARNESS_STOP_TIMEOUT_SECS";
}

impl HarnessConfig {
    /// Load .env files in order of precedence
    fn load_env_files() {
        let env = std::env::var("HARNESS_ENV")
            .or_else(|_| std::env::var("NODE_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let env_specific_file = format!(".env.{}", env);
        let env_files = [".env", env_specific_file.as_str(), ".env.local"];

        for env_file in env_files {
            match dotenvy::from_filename(env_file) {
                Ok(_) => {
                    tracing::info!("Loaded environment variables from {}", env_file);
                }
                Err(e) if e.not_found() => {
                    tracing::debug!("No {} file found, skipping", env_file);
                }
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", env_file, e);
                }
            }
        }
    }

    /// Load configuration from file with environment variables and CLI overrides
    pub fn load<P: AsRef<Path>>(path: P, overrides: CliOverrides) -> Result<Self> {
        Self::load_env_files();

        let mut config = if path.as_ref().exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                HarnessError::config(format!("Failed to read config file: {}", e))
            })?;

            serde_yaml::from_str(&content).map_err(|e| {
                HarnessError::config(format!("Failed to parse config file: {}", e))
            })?
        } else {
            tracing::debug!("Config file {:?} not found, using defaults", path.as_ref());
            Self::default()
        };

        // Precedence: .env < file < env < CLI
        config.apply_environment_overrides()?;
        config.apply_cli_overrides(overrides);

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_environment_overrides(&mut self) -> Result<()> {
        if let Some(host) = non_empty_var(EnvVars::HOST) {
            self.server.host = host;
        }

        if let Some(port_str) = non_empty_var(EnvVars::PORT) {
            self.server.port = port_str.parse().map_err(|e| {
                HarnessError::config(format!("Invalid {} environment variable: {}", EnvVars::PORT, e))
            })?;
        }

        if let Some(root) = non_empty_var(EnvVars::GAMES_ROOT) {
            self.games.root = PathBuf::from(root);
        }

        if let Some(runners) = non_empty_var(EnvVars::RUNNERS_FILE) {
            self.games.runners_file = Some(PathBuf::from(runners));
        }

        if let Some(log_root) = non_empty_var(EnvVars::LOG_ROOT) {
            self.games.log_root = PathBuf::from(log_root);
        }

        if let Some(reclaim) = non_empty_var(EnvVars::RECLAIM_PORTS) {
            self.supervisor.reclaim_ports = parse_bool(&reclaim).ok_or_else(|| {
                HarnessError::config(format!(
                    "Invalid {}: {} (valid options: true, false)",
                    EnvVars::RECLAIM_PORTS,
                    reclaim
                ))
            })?;
        }

        if let Some(timeout) = non_empty_var(EnvVars::STOP_TIMEOUT_SECS) {
            self.supervisor.stop_timeout_secs = timeout.parse().map_err(|e| {
                HarnessError::config(format!(
                    "Invalid {} environment variable: {}",
                    EnvVars::STOP_TIMEOUT_SECS,
                    e
                ))
            })?;
        }

        Ok(())
    }

    fn apply_cli_overrides(&mut self, overrides: CliOverrides) {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(root) = overrides.games_root {
            self.games.root = root;
        }
        if let Some(log_root) = overrides.log_root {
            self.games.log_root = log_root;
        }
        if overrides.no_reclaim_ports {
            self.supervisor.reclaim_ports = false;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(HarnessError::config("Server host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(HarnessError::config("Server port must be greater than 0"));
        }
        if self.supervisor.log_capacity == 0 || self.supervisor.event_capacity == 0 {
            return Err(HarnessError::config("Log and event capacities must be greater than 0"));
        }
        if self.supervisor.stop_timeout_secs == 0 {
            return Err(HarnessError::config("stop_timeout_secs must be greater than 0"));
        }
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(HarnessError::config(format!(
                    "Unsupported log format '{}' (valid options: text, json)",
                    other
                )))
            }
        }
        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
