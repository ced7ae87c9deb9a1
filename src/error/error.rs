//! Error types and handling for the Arcade Harness

use actix_web::http::StatusCode;
use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum HarnessError {
    /// No runners.json entry for the folder
    #[error("No configuration found for \"{name}\" in runners.json")]
    ConfigMissing { name: String },

    /// runners.json entry present but unusable
    #[error("{message}")]
    ConfigInvalid { name: String, message: String },

    /// A process record already exists for the folder
    #[error("Already running")]
    AlreadyRunning { name: String },

    /// A start or stop for the folder is still in flight
    #[error("\"{name}\" is currently {phase}")]
    Transitioning { name: String, phase: String },

    /// No process record exists for the folder
    #[error("Process not found or not running")]
    NotRunning { name: String },

    /// Folder absent from disk (and from runners.json where relevant)
    #[error("Folder not found")]
    FolderNotFound { name: String },

    /// A setup step exited non-zero; the long-running process was never spawned
    #[error("Setup command `{command}` for \"{name}\" failed with {}", describe_code(.code))]
    SetupCommandFailed {
        name: String,
        command: String,
        code: Option<i32>,
    },

    /// Spawn-time OS error
    #[error("Failed to start \"{name}\": {message}")]
    ChildProcess { name: String, message: String },

    /// Harness configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl HarnessError {
    /// Create a harness configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid runner configuration error
    pub fn config_invalid<S: Into<String>>(name: S, message: S) -> Self {
        Self::ConfigInvalid {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a missing runner configuration error
    pub fn config_missing<S: Into<String>>(name: S) -> Self {
        Self::ConfigMissing { name: name.into() }
    }

    pub fn already_running<S: Into<String>>(name: S) -> Self {
        Self::AlreadyRunning { name: name.into() }
    }

    pub fn not_running<S: Into<String>>(name: S) -> Self {
        Self::NotRunning { name: name.into() }
    }

    pub fn folder_not_found<S: Into<String>>(name: S) -> Self {
        Self::FolderNotFound { name: name.into() }
    }

    /// Create a spawn error for a folder's process
    pub fn child_process<S: Into<String>, E: std::fmt::Display>(name: S, error: E) -> Self {
        Self::ChildProcess {
            name: name.into(),
            message: error.to_string(),
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            HarnessError::ConfigMissing { .. } => "config_missing",
            HarnessError::ConfigInvalid { .. } => "config_invalid",
            HarnessError::AlreadyRunning { .. } => "already_running",
            HarnessError::Transitioning { .. } => "transitioning",
            HarnessError::NotRunning { .. } => "not_running",
            HarnessError::FolderNotFound { .. } => "folder_not_found",
            HarnessError::SetupCommandFailed { .. } => "setup_command_failed",
            HarnessError::ChildProcess { .. } => "child_process",
            HarnessError::Config { .. } => "config",
            HarnessError::Io(_) => "io",
            HarnessError::Serde(_) => "serialization",
            HarnessError::Yaml(_) => "yaml",
        }
    }

    /// HTTP status the API answers with for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            HarnessError::ConfigMissing { .. }
            | HarnessError::ConfigInvalid { .. }
            | HarnessError::AlreadyRunning { .. } => StatusCode::BAD_REQUEST,
            HarnessError::Transitioning { .. } => StatusCode::CONFLICT,
            HarnessError::NotRunning { .. } | HarnessError::FolderNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            HarnessError::SetupCommandFailed { .. }
            | HarnessError::ChildProcess { .. }
            | HarnessError::Config { .. }
            | HarnessError::Io(_)
            | HarnessError::Serde(_)
            | HarnessError::Yaml(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error reflects a caller mistake rather than a harness failure
    pub fn is_client_error(&self) -> bool {
        self.http_status().is_client_error()
    }
}
