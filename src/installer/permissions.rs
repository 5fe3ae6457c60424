//! Write-permission check
//!
//! Run before an action opens its transaction. If anything it would touch is
//! not writable the action refuses to start, so no backup is ever created.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{self, Result};

/// Whether files can be created in `dir`
///
/// A missing directory counts as writable when its closest existing ancestor
/// is, since the action will create it.
pub fn is_dir_writable(dir: &Path) -> bool {
    let mut ancestor = dir;
    while !ancestor.exists() {
        match ancestor.parent() {
            Some(parent) => ancestor = parent,
            None => return false,
        }
    }
    if !ancestor.is_dir() || is_readonly(ancestor) {
        return false;
    }
    tempfile::NamedTempFile::new_in(ancestor).is_ok()
}

/// Whether `path` can be overwritten or created
pub fn is_file_writable(path: &Path) -> bool {
    if !path.exists() {
        return path.parent().is_none_or(is_dir_writable);
    }
    if !path.is_file() || is_readonly(path) {
        return false;
    }
    OpenOptions::new().append(true).open(path).is_ok()
}

fn is_readonly(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.permissions().readonly())
        .unwrap_or(true)
}

/// Paths an action needs write access to
#[derive(Debug, Default, Clone)]
pub struct WriteAccess {
    dirs: Vec<PathBuf>,
    files: Vec<PathBuf>,
}

impl WriteAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.push(dir.into());
        self
    }

    pub fn file(mut self, file: impl Into<PathBuf>) -> Self {
        self.files.push(file.into());
        self
    }

    pub fn files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    /// Every path that is not writable
    pub fn denied(&self) -> Vec<&Path> {
        let dirs = self
            .dirs
            .iter()
            .filter(|d| !is_dir_writable(d))
            .map(PathBuf::as_path);
        let files = self
            .files
            .iter()
            .filter(|f| !is_file_writable(f))
            .map(PathBuf::as_path);
        dirs.chain(files).collect()
    }

    /// Fail on the first path that is not writable
    ///
    /// Every denied path is logged, not only the first.
    pub fn check(&self) -> Result<()> {
        let denied = self.denied();
        for path in &denied {
            warn!(path = %path.display(), "not writable");
        }
        match denied.first() {
            Some(path) => Err(error::fs::access_denied(path.display().to_string())),
            None => Ok(()),
        }
    }
}
