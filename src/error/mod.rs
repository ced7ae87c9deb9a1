//! Error handling module for the Arcade Harness
//!
//! This module provides the error taxonomy shared by the supervisor, the
//! log/event stores and the HTTP API.

mod error;

// Re-export the main error types and utilities
pub use error::{HarnessError, Result};
