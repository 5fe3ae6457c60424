//! Proxy loader (doorstop shim) installation
//!
//! Instead of patching an assembly, the proxy strategy drops a shim library
//! next to the game executable. The game loads it in place of a system
//! library; the shim then reads its config and loads the manager assembly.
//! The shim must match the bitness of the executable.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use goblin::pe::header::{COFF_MACHINE_ARM64, COFF_MACHINE_X86_64, Header};
use tracing::{debug, info, warn};

use crate::error::{self, Result};

use super::remove_if_present;

/// Name the shim is installed under in the game root
pub const SHIM_FILE: &str = "version.dll";

/// Bundled shim for 32-bit executables
pub const SHIM_X86: &str = "version_x86.dll";

/// Bundled shim for 64-bit executables
pub const SHIM_X64: &str = "version_x64.dll";

/// Shim config file in the game root
pub const SHIM_CONFIG_FILE: &str = "doorstop_config.ini";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    X86,
    X64,
}

impl Bitness {
    /// Bundled shim file for this bitness
    pub fn shim_source(self) -> &'static str {
        match self {
            Self::X86 => SHIM_X86,
            Self::X64 => SHIM_X64,
        }
    }
}

impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86 => write!(f, "x86"),
            Self::X64 => write!(f, "x64"),
        }
    }
}

/// Bitness of a PE executable, read from its COFF header
///
/// Anything that cannot be read as a PE image is treated as 32-bit.
pub fn detect_bitness(executable: &Path) -> Bitness {
    let bytes = match fs::read(executable) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %executable.display(), error = %e, "cannot read executable, assuming x86");
            return Bitness::X86;
        }
    };

    match Header::parse(&bytes) {
        Ok(header) => match header.coff_header.machine {
            COFF_MACHINE_X86_64 | COFF_MACHINE_ARM64 => Bitness::X64,
            _ => Bitness::X86,
        },
        Err(e) => {
            warn!(path = %executable.display(), error = %e, "not a PE image, assuming x86");
            Bitness::X86
        }
    }
}

/// Contents of the shim config pointing at `manager_assembly`
pub fn shim_config(manager_assembly: &Path) -> String {
    format!(
        "[UnityDoorstop]\nenabled = true\ntargetAssembly = {}\n",
        manager_assembly.display()
    )
}

/// Installs and removes the shim for one game
#[derive(Debug, Clone)]
pub struct ProxyLoader {
    bundle_dir: PathBuf,
    game_root: PathBuf,
    executable: PathBuf,
    manager_assembly: PathBuf,
}

impl ProxyLoader {
    pub fn new(
        bundle_dir: impl Into<PathBuf>,
        game_root: impl Into<PathBuf>,
        executable: impl Into<PathBuf>,
        manager_assembly: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bundle_dir: bundle_dir.into(),
            game_root: game_root.into(),
            executable: executable.into(),
            manager_assembly: manager_assembly.into(),
        }
    }

    pub fn shim_path(&self) -> PathBuf {
        self.game_root.join(SHIM_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.game_root.join(SHIM_CONFIG_FILE)
    }

    /// Every path [`install`](Self::install) and [`remove`](Self::remove) touch
    pub fn paths(&self) -> Vec<PathBuf> {
        vec![self.shim_path(), self.config_path()]
    }

    pub fn is_installed(&self) -> bool {
        self.shim_path().is_file()
    }

    /// Replace any existing shim with the one matching the executable
    ///
    /// # Errors
    /// Fails without installing if the previous shim cannot be removed.
    pub fn install(&self) -> Result<Bitness> {
        self.remove().map_err(|e| {
            error::install::action_failed("Removing the previous proxy loader", e.to_string())
        })?;

        let bitness = detect_bitness(&self.executable);
        let source = self.bundle_dir.join(bitness.shim_source());
        if !source.is_file() {
            return Err(error::fs::not_found(source.display().to_string()));
        }

        let shim = self.shim_path();
        fs::copy(&source, &shim)
            .map_err(|e| error::fs::write_failed(shim.display().to_string(), e.to_string()))?;
        info!(shim = %bitness.shim_source(), "installed proxy loader");

        let config = self.config_path();
        fs::write(&config, shim_config(&self.manager_assembly))
            .map_err(|e| error::fs::write_failed(config.display().to_string(), e.to_string()))?;
        debug!(config = %config.display(), "wrote proxy loader config");

        Ok(bitness)
    }

    /// Delete the shim and its config; absent files are fine
    pub fn remove(&self) -> Result<()> {
        if remove_if_present(&self.shim_path())? {
            debug!("removed proxy loader shim");
        }
        remove_if_present(&self.config_path())?;
        Ok(())
    }
}
