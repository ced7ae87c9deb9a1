//! Process table
//!
//! One slot per folder. Every transition (reserve, promote, begin stop,
//! deregister) happens under a single write guard, so the existence check
//! and the mutation are atomic together.

use super::types::{ExitInfo, FolderState, ProcessRecord};
use crate::error::{HarnessError, Result};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use uuid::Uuid;

/// A registered process plus the channel its exit is announced on
#[derive(Debug, Clone)]
pub struct RunningProcess {
    pub record: ProcessRecord,
    pub exit: watch::Receiver<Option<ExitInfo>>,
}

#[derive(Debug, Clone)]
enum Slot {
    Starting,
    Running(RunningProcess),
    Stopping(RunningProcess),
}

impl Slot {
    fn state(&self) -> FolderState {
        match self {
            Slot::Starting => FolderState::Starting,
            Slot::Running(_) => FolderState::Running,
            Slot::Stopping(_) => FolderState::Stopping,
        }
    }

    fn process(&self) -> Option<&RunningProcess> {
        match self {
            Slot::Starting => None,
            Slot::Running(p) | Slot::Stopping(p) => Some(p),
        }
    }
}

/// Live processes keyed by folder name
#[derive(Debug, Default)]
pub struct ProcessTable {
    slots: RwLock<HashMap<String, Slot>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Slot>> {
        self.slots.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Slot>> {
        self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the folder for a start; fails if anything occupies the slot
    pub fn reserve(&self, name: &str) -> Result<()> {
        let mut slots = self.write();
        match slots.get(name) {
            Some(Slot::Running(_)) => Err(HarnessError::already_running(name)),
            Some(slot) => Err(HarnessError::Transitioning {
                name: name.to_string(),
                phase: slot.state().to_string(),
            }),
            None => {
                slots.insert(name.to_string(), Slot::Starting);
                Ok(())
            }
        }
    }

    /// Drop a reservation that never produced a process
    pub fn release(&self, name: &str) {
        let mut slots = self.write();
        if matches!(slots.get(name), Some(Slot::Starting)) {
            slots.remove(name);
        }
    }

    /// Turn a reservation into a registered process
    pub fn promote(&self, name: &str, process: RunningProcess) {
        self.write().insert(name.to_string(), Slot::Running(process));
    }

    /// Mark a running folder as stopping and hand back its process
    pub fn begin_stop(&self, name: &str) -> Result<RunningProcess> {
        let mut slots = self.write();
        match slots.get(name) {
            None => Err(HarnessError::not_running(name)),
            Some(Slot::Running(process)) => {
                let process = process.clone();
                slots.insert(name.to_string(), Slot::Stopping(process.clone()));
                Ok(process)
            }
            Some(slot) => Err(HarnessError::Transitioning {
                name: name.to_string(),
                phase: slot.state().to_string(),
            }),
        }
    }

    /// Deregister the given run; a newer run under the same name is left alone
    pub fn remove_run(&self, name: &str, run_id: Uuid) -> bool {
        let mut slots = self.write();
        let matches = slots
            .get(name)
            .and_then(Slot::process)
            .map(|p| p.record.run_id == run_id)
            .unwrap_or(false);
        if matches {
            slots.remove(name);
        }
        matches
    }

    pub fn state(&self, name: &str) -> Option<FolderState> {
        self.read().get(name).map(Slot::state)
    }

    pub fn record(&self, name: &str) -> Option<ProcessRecord> {
        self.read()
            .get(name)
            .and_then(Slot::process)
            .map(|p| p.record.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Names of folders with a registered, not yet stopping, process
    pub fn running_names(&self) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of registered process records
    pub fn record_count(&self) -> usize {
        self.read().values().filter(|s| s.process().is_some()).count()
    }
}
