//! Games root watcher
//!
//! Logs folders as they appear and stops a folder's process when its
//! directory is removed or renamed away.

use super::process::Supervisor;
use super::types::FolderState;
use crate::error::{HarnessError, Result};
use crate::registry::is_ignored_dir;
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a filesystem event means for the folder registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderChange {
    Added(String),
    Removed(String),
}

/// Map a raw notify event to folder changes directly under `root`
pub fn classify(root: &Path, event: &notify::Event) -> Vec<FolderChange> {
    event
        .paths
        .iter()
        .filter(|path| path.parent() == Some(root))
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?.to_string();
            if is_ignored_dir(&name) {
                return None;
            }
            match event.kind {
                EventKind::Create(_) if path.is_dir() => Some(FolderChange::Added(name)),
                EventKind::Remove(_) => Some(FolderChange::Removed(name)),
                EventKind::Modify(ModifyKind::Name(_)) if !path.exists() => {
                    Some(FolderChange::Removed(name))
                }
                EventKind::Modify(ModifyKind::Name(_)) if path.is_dir() => {
                    Some(FolderChange::Added(name))
                }
                _ => None,
            }
        })
        .collect()
}

/// Start watching the games root. The returned watcher must be kept alive.
pub fn spawn_folder_watcher(supervisor: Arc<Supervisor>) -> Result<RecommendedWatcher> {
    let root: PathBuf = supervisor
        .games_root()
        .canonicalize()
        .map_err(|e| HarnessError::config(format!("Cannot watch {:?}: {}", supervisor.games_root(), e)))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = tx.send(res);
    })
    .map_err(|e| HarnessError::config(format!("Failed to create folder watcher: {}", e)))?;

    watcher
        .watch(&root, RecursiveMode::NonRecursive)
        .map_err(|e| HarnessError::config(format!("Failed to watch {:?}: {}", root, e)))?;
    info!("👀 Watching for folders in {:?}", root);

    tokio::spawn(async move {
        while let Some(res) = rx.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("Folder watcher error: {}", e);
                    continue;
                }
            };

            for change in classify(&root, &event) {
                match change {
                    FolderChange::Added(name) => info!("New folder detected: {}", name),
                    FolderChange::Removed(name) => {
                        info!("Folder removed: {}", name);
                        stop_removed(&supervisor, name);
                    }
                }
            }
        }
        debug!("Folder watcher channel closed");
    });

    Ok(watcher)
}

/// Stop a removed folder's process in its own task so the event loop keeps
/// draining while the tree shuts down
fn stop_removed(supervisor: &Arc<Supervisor>, name: String) -> Option<JoinHandle<()>> {
    if supervisor.state(&name) != Some(FolderState::Running) {
        debug!("No running process for removed folder '{}'", name);
        return None;
    }

    let supervisor = Arc::clone(supervisor);
    Some(tokio::spawn(async move {
        if let Err(e) = supervisor.stop(&name).await {
            warn!("Failed to stop '{}' after its folder was removed: {}", name, e);
        }
    }))
}
