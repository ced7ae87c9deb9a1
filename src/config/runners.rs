//! runners.json loading
//!
//! The launch configuration is re-read on every call so edits take effect
//! without restarting the harness. A missing or malformed file degrades to an
//! empty mapping: every folder then reports a configuration error instead of
//! taking the server down.

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// `command` may be one long-running command line or a list of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Single(String),
    Steps(Vec<String>),
}

impl CommandSpec {
    /// Non-blank command lines in order
    pub fn lines(&self) -> Vec<String> {
        let raw: Vec<&String> = match self {
            CommandSpec::Single(line) => vec![line],
            CommandSpec::Steps(lines) => lines.iter().collect(),
        };
        raw.into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

/// One runners.json entry, as written by hand
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Resolved launch configuration for a folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub folder_name: String,
    /// Never empty; all but the last are setup steps
    pub commands: Vec<String>,
    /// Always greater than zero
    pub port: u16,
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// One-shot steps that must succeed before the server starts
    pub fn setup_commands(&self) -> &[String] {
        &self.commands[..self.commands.len() - 1]
    }

    /// The long-running server command line
    pub fn server_command(&self) -> &str {
        &self.commands[self.commands.len() - 1]
    }
}

impl RunnerEntry {
    /// Validate the entry and turn it into a [`LaunchSpec`]
    pub fn resolve(&self, name: &str) -> Result<LaunchSpec> {
        let commands = self
            .command
            .as_ref()
            .map(CommandSpec::lines)
            .unwrap_or_default();
        if commands.is_empty() {
            return Err(HarnessError::config_invalid(
                name.to_string(),
                format!("No command specified for \"{}\" in runners.json", name),
            ));
        }

        let port = match self.port {
            Some(port) if port > 0 => port,
            _ => {
                return Err(HarnessError::config_invalid(
                    name.to_string(),
                    format!("No port specified for \"{}\" in runners.json", name),
                ))
            }
        };

        let env = self
            .env
            .iter()
            .map(|(key, value)| (key.clone(), expand_env_value(value)))
            .collect();

        Ok(LaunchSpec {
            folder_name: name.to_string(),
            commands,
            port,
            env,
        })
    }

    /// First command line, for display in the folder listing
    pub fn display_command(&self) -> Option<String> {
        self.command
            .as_ref()
            .map(|c| c.lines().join(" && "))
            .filter(|c| !c.is_empty())
    }
}

/// Expand `${VAR}` references; unknown variables keep the raw text
fn expand_env_value(value: &str) -> String {
    match shellexpand::env(value) {
        Ok(expanded) => expanded.into_owned(),
        Err(e) => {
            debug!("Leaving env value unexpanded ({}): {}", e, value);
            value.to_string()
        }
    }
}

/// Loader for the runners.json document
pub struct RunnersFile;

impl RunnersFile {
    /// Read and parse the whole mapping; failures yield an empty map
    pub fn load(path: &Path) -> BTreeMap<String, RunnerEntry> {
        if !path.exists() {
            debug!("Runners file {:?} does not exist", path);
            return BTreeMap::new();
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Error reading {:?}: {}", path, e);
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Error parsing {:?}: {}", path, e);
                BTreeMap::new()
            }
        }
    }

    /// Resolve a single folder's launch spec
    pub fn launch_spec(path: &Path, name: &str) -> Result<LaunchSpec> {
        Self::load(path)
            .get(name)
            .ok_or_else(|| HarnessError::config_missing(name))?
            .resolve(name)
    }

    /// Rewrite the file without `name`; returns whether an entry was removed.
    ///
    /// Unlike [`RunnersFile::load`] this is strict: a document that cannot be
    /// parsed is reported instead of being overwritten.
    pub fn remove(path: &Path, name: &str) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }

        let content = std::fs::read_to_string(path)?;
        let mut document: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&content)?;

        if document.remove(name).is_none() {
            return Ok(false);
        }

        let mut rendered = serde_json::to_string_pretty(&document)?;
        rendered.push('\n');
        std::fs::write(path, rendered)?;
        Ok(true)
    }
}
