//! Manager library synchronisation
//!
//! Libraries are copied from the bundle into the manager directory of the
//! game. A destination whose last-write time equals the bundled file's is
//! considered current and left alone.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info};

use crate::error::{self, Result};
use crate::state::version::{LEGACY_LIBRARIES_BEFORE, Version};

use super::{ensure_parent_dir, remove_if_present};

/// File name of the manager assembly, both in the bundle and in the game
pub const MANAGER_ASSEMBLY: &str = "ModManager.dll";

/// Libraries shipped with every installation
const LIBRARIES: &[&str] = &["0Harmony.dll", "dnlib.dll", "System.Xml.dll", MANAGER_ASSEMBLY];

/// Libraries only games older than [`LEGACY_LIBRARIES_BEFORE`] still load
const LEGACY_LIBRARIES: &[&str] = &["0Harmony12.dll", "0Harmony-1.2.dll"];

/// Library file names to install for a game supporting `minimal` onwards
pub fn library_set(minimal: Version) -> Vec<&'static str> {
    let mut files = LIBRARIES.to_vec();
    if minimal < LEGACY_LIBRARIES_BEFORE {
        files.extend_from_slice(LEGACY_LIBRARIES);
    }
    files
}

/// What an install pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub copied: Vec<String>,
    pub skipped: Vec<String>,
}

/// Copies a fixed set of libraries from the bundle into the game
#[derive(Debug, Clone)]
pub struct LibrarySync {
    bundle_dir: PathBuf,
    manager_dir: PathBuf,
    files: Vec<String>,
}

impl LibrarySync {
    pub fn new<S: AsRef<str>>(
        bundle_dir: impl Into<PathBuf>,
        manager_dir: impl Into<PathBuf>,
        files: &[S],
    ) -> Self {
        Self {
            bundle_dir: bundle_dir.into(),
            manager_dir: manager_dir.into(),
            files: files.iter().map(|f| f.as_ref().to_string()).collect(),
        }
    }

    /// Installed locations of every library
    pub fn destinations(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .map(|f| self.manager_dir.join(f))
            .collect()
    }

    /// Bundled locations of every library
    pub fn sources(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| self.bundle_dir.join(f)).collect()
    }

    /// Copy every library whose destination differs from the bundle
    ///
    /// # Errors
    /// Fails on the first library that is missing from the bundle or cannot
    /// be written. Libraries copied before that point stay copied.
    pub fn install(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for file in &self.files {
            let source = self.bundle_dir.join(file);
            let destination = self.manager_dir.join(file);

            let source_time = modified(&source)?;
            if destination.is_file() && modified(&destination)? == source_time {
                debug!(library = %file, "unchanged, skipping");
                report.skipped.push(file.clone());
                continue;
            }

            ensure_parent_dir(&destination)?;
            copy_preserving_mtime(&source, &destination, source_time)?;
            info!(library = %file, "copied");
            report.copied.push(file.clone());
        }

        Ok(report)
    }

    /// Delete every installed library; returns how many existed
    pub fn remove(&self) -> Result<usize> {
        let mut removed = 0;
        for destination in self.destinations() {
            if remove_if_present(&destination)? {
                debug!(library = %destination.display(), "removed");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn modified(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => error::fs::not_found(path.display().to_string()),
            _ => error::fs::read_failed(path.display().to_string(), e.to_string()),
        })
}

fn copy_preserving_mtime(source: &Path, destination: &Path, time: SystemTime) -> Result<()> {
    let write_err =
        |e: std::io::Error| error::fs::write_failed(destination.display().to_string(), e.to_string());

    fs::copy(source, destination).map_err(write_err)?;
    File::options()
        .write(true)
        .open(destination)
        .and_then(|f| f.set_modified(time))
        .map_err(write_err)
}
