//! Backup transactions for all-or-nothing file operations
//!
//! Every mutating action opens a [`BackupSet`] over all paths it may touch
//! before changing anything. Each existing file is copied next to itself as
//! `<path>.backup_`; on success the backups are deleted, on failure they are
//! copied back over the live files.
//!
//! ## Usage
//!
//! ```ignore
//! let mut backups = BackupSet::begin(&paths)?;
//!
//! // Perform operations...
//! backups.track_dir_created(&mods_dir);
//!
//! // On success:
//! backups.commit();
//!
//! // On error (automatic via Drop if not committed):
//! // abort happens automatically
//! ```
//!
//! A backup left behind by an interrupted run is never overwritten. The next
//! transaction over the same path adopts it, so its abort restores the bytes
//! from before the interrupted run.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{self, ModhookError, Result};

/// Suffix appended to a path to form its backup
pub const BACKUP_SUFFIX: &str = ".backup_";

/// Backup location for `path`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Live path that a backup file belongs to
pub fn live_path(backup: &Path) -> Option<PathBuf> {
    let name = backup.to_str()?;
    name.strip_suffix(BACKUP_SUFFIX)
        .filter(|live| !live.is_empty())
        .map(PathBuf::from)
}

/// One path under an open transaction
#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    backup: PathBuf,
    /// Whether a backup holds the pre-transaction content. When `false` the
    /// path did not exist and abort deletes whatever was created there.
    has_backup: bool,
}

/// An open backup transaction
#[derive(Debug)]
pub struct BackupSet {
    entries: Vec<Entry>,

    /// Directories created during this transaction
    created_dirs: HashSet<PathBuf>,

    /// Whether commit or abort already ran
    finished: bool,
}

impl BackupSet {
    /// Snapshot every path before mutation
    ///
    /// Paths are deduplicated while keeping their order.
    ///
    /// # Errors
    /// Returns [`ModhookError::FileWriteFailed`] if a backup cannot be made.
    /// Backups made up to that point are resolved before returning.
    pub fn begin<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut set = Self {
            entries: Vec::with_capacity(paths.len()),
            created_dirs: HashSet::new(),
            finished: false,
        };

        let mut seen = HashSet::new();
        for path in paths {
            let path = path.as_ref();
            if !seen.insert(path.to_path_buf()) {
                continue;
            }
            // On error `set` drops here and aborts what was backed up so far
            let entry = snapshot(path)?;
            set.entries.push(entry);
        }

        debug!(
            paths = set.entries.len(),
            backups = set.entries.iter().filter(|e| e.has_backup).count(),
            "began backup transaction"
        );
        Ok(set)
    }

    /// Paths covered by this transaction, in order
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|e| e.path.as_path())
    }

    /// Whether `path` is covered by this transaction
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }

    /// Track a directory that was created during this transaction
    ///
    /// It is removed on abort if it is empty by then.
    pub fn track_dir_created(&mut self, path: impl Into<PathBuf>) {
        self.created_dirs.insert(path.into());
    }

    /// Keep all changes and delete the backups
    pub fn commit(mut self) {
        self.finished = true;
        for entry in &self.entries {
            if entry.has_backup {
                if let Err(e) = fs::remove_file(&entry.backup) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(backup = %entry.backup.display(), error = %e, "failed to delete backup");
                    }
                }
            }
        }
        debug!(paths = self.entries.len(), "committed backup transaction");
    }

    /// Restore every path to its pre-transaction content
    ///
    /// Restoration is best effort: every path is attempted even when an
    /// earlier one fails.
    ///
    /// # Errors
    /// Returns the first [`ModhookError::BackupRestore`] encountered. Callers
    /// usually log it and report their original failure instead.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        match self.rollback().into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn rollback(&mut self) -> Vec<ModhookError> {
        let mut failures = Vec::new();

        for entry in self.entries.iter().rev() {
            let result = if entry.has_backup {
                restore(entry)
            } else {
                remove_created(&entry.path)
            };
            if let Err(e) = result {
                warn!(path = %entry.path.display(), error = %e, "failed to restore");
                failures.push(e);
            }
        }

        // Remove created directories (in reverse order to handle nesting)
        let mut dirs: Vec<_> = self.created_dirs.iter().collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            let empty = fs::read_dir(dir)
                .map(|mut d| d.next().is_none())
                .unwrap_or(false);
            if empty {
                let _ = fs::remove_dir(dir);
            }
        }

        debug!(
            paths = self.entries.len(),
            failures = failures.len(),
            "aborted backup transaction"
        );
        failures
    }
}

impl Drop for BackupSet {
    fn drop(&mut self) {
        if !self.finished {
            // Automatic abort on drop if neither committed nor aborted
            self.finished = true;
            self.rollback();
        }
    }
}

fn snapshot(path: &Path) -> Result<Entry> {
    let backup = backup_path(path);

    if backup.is_file() {
        warn!(backup = %backup.display(), "keeping backup from an interrupted run");
        return Ok(Entry {
            path: path.to_path_buf(),
            backup,
            has_backup: true,
        });
    }

    if !path.is_file() {
        return Ok(Entry {
            path: path.to_path_buf(),
            backup,
            has_backup: false,
        });
    }

    fs::copy(path, &backup)
        .map_err(|e| error::fs::write_failed(backup.display().to_string(), e.to_string()))?;
    debug!(path = %path.display(), "backed up");

    Ok(Entry {
        path: path.to_path_buf(),
        backup,
        has_backup: true,
    })
}

fn restore(entry: &Entry) -> Result<()> {
    fs::copy(&entry.backup, &entry.path).map_err(|e| {
        error::fs::restore_failed(entry.path.display().to_string(), e.to_string())
    })?;
    fs::remove_file(&entry.backup).map_err(|e| {
        error::fs::restore_failed(entry.backup.display().to_string(), e.to_string())
    })?;
    Ok(())
}

fn remove_created(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(error::fs::restore_failed(
            path.display().to_string(),
            e.to_string(),
        )),
    }
}

/// Backups left behind by interrupted transactions over `paths`
pub fn pending_backups<P: AsRef<Path>>(paths: &[P]) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = paths
        .iter()
        .map(|p| backup_path(p.as_ref()))
        .filter(|b| b.is_file())
        .collect();
    found.sort();
    found.dedup();
    found
}

/// Put stale backups back over their live files
///
/// Adopts each backup into a transaction and aborts it.
///
/// # Errors
/// Returns the first [`ModhookError::BackupRestore`] encountered.
pub fn recover(backups: &[PathBuf]) -> Result<usize> {
    let live: Vec<PathBuf> = backups.iter().filter_map(|b| live_path(b)).collect();
    let count = live.len();
    BackupSet::begin(&live)?.abort()?;
    Ok(count)
}
