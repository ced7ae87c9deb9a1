//! Arcade Harness - local development harness for browser games
//!
//! Launches each game folder's dev server as a supervised subprocess, keeps a
//! bounded log of its output, extracts structured game events from stdout and
//! from the browser, and exposes all of it over a small REST API.

pub mod config;
pub mod error;
pub mod registry;
pub mod startup;
pub mod supervisor;
pub mod web;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use registry::FolderScanner;
pub use supervisor::{ProcessTable, Supervisor};
pub use web::{configure_api, HarnessApi};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "arcade-harness.yaml";

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 3001;

/// Launch configuration file looked up in the games root
pub const RUNNERS_FILE_NAME: &str = "runners.json";
