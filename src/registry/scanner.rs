//! Folder Scanner
//!
//! Joins three sources into one listing: the directories under the games
//! root, the runners.json keys and the process table. runners.json is the
//! authoritative registry, so a configured folder that vanished from disk is
//! reported as an error instead of disappearing from the list.

use super::is_ignored_dir;
use crate::config::{RunnerEntry, RunnersFile};
use crate::error::{HarnessError, Result};
use crate::supervisor::{FolderState, FolderStatus, ProcessTable};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Produces [`FolderStatus`] snapshots; holds no state of its own
pub struct FolderScanner {
    games_root: PathBuf,
    runners_path: PathBuf,
    table: Arc<ProcessTable>,
}

impl FolderScanner {
    pub fn new(games_root: PathBuf, runners_path: PathBuf, table: Arc<ProcessTable>) -> Self {
        Self {
            games_root,
            runners_path,
            table,
        }
    }

    /// Current status of every known folder, sorted by name
    pub fn scan(&self) -> Result<Vec<FolderStatus>> {
        let entries = RunnersFile::load(&self.runners_path);
        let on_disk = self.disk_folders()?;

        let names: BTreeSet<&String> = on_disk.iter().chain(entries.keys()).collect();
        let root = self
            .games_root
            .canonicalize()
            .unwrap_or_else(|_| self.games_root.clone());

        let folders: Vec<FolderStatus> = names
            .into_iter()
            .map(|name| self.folder_status(&root, name, on_disk.contains(name), &entries))
            .collect();

        debug!("Scanned {} folders in {:?}", folders.len(), self.games_root);
        Ok(folders)
    }

    fn disk_folders(&self) -> Result<BTreeSet<String>> {
        let reader = match std::fs::read_dir(&self.games_root) {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Games root {:?} does not exist", self.games_root);
                return Ok(BTreeSet::new());
            }
            Err(e) => return Err(HarnessError::Io(e)),
        };

        let mut folders = BTreeSet::new();
        for entry in reader {
            let entry = entry?;
            // Follows symlinks so linked game folders are listed too
            if !entry.path().is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if !is_ignored_dir(&name) => {
                    folders.insert(name);
                }
                Ok(_) => {}
                Err(raw) => debug!("Skipping non UTF-8 folder name {:?}", raw),
            }
        }
        Ok(folders)
    }

    fn folder_status(
        &self,
        root: &Path,
        name: &str,
        on_disk: bool,
        entries: &BTreeMap<String, RunnerEntry>,
    ) -> FolderStatus {
        let entry = entries.get(name);
        let mut status = FolderStatus {
            name: name.to_string(),
            path: root.join(name),
            port: entry.and_then(|e| e.port).filter(|port| *port > 0),
            status: FolderState::Stopped,
            error: None,
            pid: None,
            command: entry.and_then(RunnerEntry::display_command),
        };

        // A live or transitioning process wins over configuration problems
        if let Some(state) = self.table.state(name) {
            status.status = state;
            if let Some(record) = self.table.record(name) {
                status.port = Some(record.port);
                status.pid = Some(record.pid);
            }
            return status;
        }

        let problem = if !on_disk {
            Some(format!("Folder \"{}\" not found on disk", name))
        } else {
            match entry {
                None => Some(HarnessError::config_missing(name).to_string()),
                Some(entry) => entry.resolve(name).err().map(|e| e.to_string()),
            }
        };

        if let Some(message) = problem {
            status.status = FolderState::Error;
            status.error = Some(message);
        }
        status
    }
}
