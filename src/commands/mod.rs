//! Command implementations for the modhook CLI
//!
//! Every game command resolves the same [`Target`] into an
//! [`InstallationContext`] first; the helpers here do that.

pub mod install;
pub mod list;
pub mod restore;
pub mod status;
pub mod uninstall;
pub mod version;

use std::env;
use std::path::PathBuf;

use tracing::debug;

use crate::cli::Target;
use crate::config::{GAMES_FILE, GameCatalog, GameDefinition};
use crate::error::{self, ModhookError, Result};
use crate::state::{HostPlatform, InstallationContext};

/// Bundle directory from the CLI, or the directory of the running binary
pub fn bundle_dir(target: &Target) -> Result<PathBuf> {
    if let Some(dir) = &target.bundle_dir {
        return Ok(dir.clone());
    }
    let exe = env::current_exe().map_err(|e| ModhookError::IoError {
        message: format!("Failed to locate the modhook binary: {e}"),
    })?;
    exe.parent()
        .map(PathBuf::from)
        .ok_or_else(|| error::fs::not_found(exe.display().to_string()))
}

/// Game directory from the CLI, or the current directory
pub fn game_dir(target: &Target) -> Result<PathBuf> {
    match &target.game_dir {
        Some(dir) => Ok(dir.clone()),
        None => env::current_dir().map_err(|e| ModhookError::IoError {
            message: format!("Failed to get current directory: {e}"),
        }),
    }
}

pub fn load_catalog(target: &Target) -> Result<GameCatalog> {
    let path = match &target.config {
        Some(path) => path.clone(),
        None => bundle_dir(target)?.join(GAMES_FILE),
    };
    GameCatalog::load(&path)
}

/// Named game, or the one whose folder is the game directory's name
fn select_game<'c>(
    catalog: &'c GameCatalog,
    target: &Target,
    game_dir: &std::path::Path,
) -> Result<&'c GameDefinition> {
    if let Some(name) = &target.game {
        return catalog.find(name);
    }
    let folder = dunce::canonicalize(game_dir)
        .ok()
        .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();
    catalog
        .find_by_folder(&folder)
        .ok_or_else(|| {
            error::config::invalid(format!(
                "no game is configured for folder '{folder}', pass --game"
            ))
        })
}

/// Resolve the CLI target into an installation context
pub fn open_context(target: &Target) -> Result<InstallationContext> {
    let catalog = load_catalog(target)?;
    let game_dir = game_dir(target)?;
    let game = select_game(&catalog, target, &game_dir)?;
    let host = HostPlatform::current();
    debug!(game = %game.name, ?host, dir = %game_dir.display(), "opening game");

    InstallationContext::build(game, &game_dir, &bundle_dir(target)?, host)
}
