//! Configuration module for the Arcade Harness
//!
//! Two documents are involved: the harness' own YAML configuration and the
//! games' `runners.json` launch table.

mod config;
pub mod runners;

// Re-export the main configuration types
pub use config::{
    CliOverrides, EnvVars, GamesConfig, HarnessConfig, LoggingConfig, ServerConfig,
    SupervisorConfig,
};
pub use runners::{CommandSpec, LaunchSpec, RunnerEntry, RunnersFile};
