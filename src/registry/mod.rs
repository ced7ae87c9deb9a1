//! Folder registry: which game folders exist and what state they are in

pub mod scanner;

pub use scanner::FolderScanner;

use crate::error::{HarnessError, Result};

/// Reject names that could escape the games root or the journal root
pub fn validate_folder_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.')
        || name.contains('\0');
    if invalid {
        return Err(HarnessError::folder_not_found(name));
    }
    Ok(())
}

/// Directories the scanner never lists
pub(crate) fn is_ignored_dir(name: &str) -> bool {
    name.starts_with('.') || name == "node_modules"
}
