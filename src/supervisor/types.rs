//! Supervisor Types
//!
//! Shared types describing folders and the processes running for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle state reported for a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderState {
    Stopped,
    Starting,
    Stopping,
    Running,
    Error,
}

impl fmt::Display for FolderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FolderState::Stopped => "stopped",
            FolderState::Starting => "starting",
            FolderState::Stopping => "stopping",
            FolderState::Running => "running",
            FolderState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of one folder, recomputed on every scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderStatus {
    pub name: String,
    pub path: PathBuf,
    pub port: Option<u16>,
    pub status: FolderState,
    /// Present only when `status` is `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Bookkeeping for a live long-running process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub folder: String,
    pub pid: u32,
    pub port: u16,
    pub start_time: DateTime<Utc>,
    /// Distinguishes successive runs of the same folder
    pub run_id: Uuid,
}

/// How a supervised process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub at: DateTime<Utc>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Terminal line appended to the folder's log
    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("Process exited with code {}", code),
            (None, Some(signal)) => format!("Process terminated by signal {}", signal),
            (None, None) => "Process exited with code null".to_string(),
        }
    }
}
