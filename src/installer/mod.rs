//! File-system side of an installation
//!
//! This module handles:
//! - Copying manager libraries into the game, skipping unchanged files
//! - Installing and removing the proxy loader shim with its config
//! - Probing write permissions before any action starts
//!
//! Nothing here opens a transaction. Callers wrap these operations in a
//! [`crate::transaction::BackupSet`] covering every path they report.

pub mod libraries;
pub mod permissions;
pub mod proxy;

use std::fs;
use std::path::Path;

use crate::error::{self, Result};

// Re-export commonly used types
pub use libraries::{LibrarySync, SyncReport};
pub use proxy::{Bitness, ProxyLoader};

/// Ensure parent directory exists for a path
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| error::fs::write_failed(parent.display().to_string(), e.to_string()))?;
    }
    Ok(())
}

/// Delete a file, treating absence as success
///
/// Returns whether a file was actually removed.
pub fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(error::fs::write_failed(
            path.display().to_string(),
            e.to_string(),
        )),
    }
}
