//! Per-game installation state (install.yaml)
//!
//! Written into the manager directory of the game on every successful
//! install and deleted on remove. Its entry point says where the bootstrap
//! call actually lives, which may differ from the current game definition.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::entry_point::EntryPointSpec;
use crate::error::{self, Result};
use crate::state::InstallType;
use crate::state::version::Version;

/// File name inside the manager directory
pub const GAME_STATE_FILE: &str = "install.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub game: String,
    /// Entry point the installation was patched at
    pub entry_point: String,
    pub install_type: InstallType,
    pub manager_version: Version,
}

impl GameState {
    /// Read the state file, `None` if there is none
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let yaml = fs::read_to_string(path)
            .map_err(|e| error::fs::read_failed(path.display().to_string(), e.to_string()))?;
        let state = serde_yaml::from_str(&yaml)
            .map_err(|e| error::config::parse_failed(path.display().to_string(), e.to_string()))?;
        Ok(Some(state))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)
            .map_err(|e| error::fs::write_failed(path.display().to_string(), e.to_string()))
    }

    pub fn entry_point(&self) -> Result<EntryPointSpec> {
        EntryPointSpec::parse(&self.entry_point)
    }
}
