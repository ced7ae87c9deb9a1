//! Process Supervisor Module
//!
//! This module owns every game process: the injected process table, start
//! and stop sequencing, process-tree termination and the games root watcher.

pub mod process;
pub mod table;
pub mod tree;
pub mod types;
pub mod watcher;

pub use process::Supervisor;
pub use table::{ProcessTable, RunningProcess};
pub use types::*;
pub use watcher::spawn_folder_watcher;
