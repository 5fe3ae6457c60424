//! Per-refresh installation context
//!
//! Everything detection and the actions need to know about one game
//! directory, resolved once: the managed folder, every path that may be
//! touched, the configured entry point and the recorded one.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;
use wax::{CandidatePath, Glob, Pattern};

use crate::config::{GAME_STATE_FILE, GameDefinition, GameState};
use crate::entry_point::EntryPointSpec;
use crate::error::{ModhookError, Result};
use crate::installer::libraries::{self, MANAGER_ASSEMBLY};
use crate::installer::{LibrarySync, ProxyLoader};

/// Suffix of the pristine copy kept on first patch
pub const ORIGINAL_SUFFIX: &str = ".original_";

/// Overrides host platform detection (`windows`, `macos`, `linux`)
pub const HOST_ENV: &str = "MODHOOK_HOST";

/// Manager directory inside the managed folder
pub const MANAGER_DIR: &str = "ModManager";

/// Files that identify a managed folder
const MANAGED_MARKERS: &[&str] = &["Assembly-CSharp.dll", "UnityEngine.dll"];

/// Managed folder inside a macOS application bundle
const MACOS_MANAGED: &str = "Contents/Resources/Data/Managed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    MacOs,
    Linux,
}

impl HostPlatform {
    /// Platform this process runs on, unless overridden by [`HOST_ENV`]
    pub fn current() -> Self {
        env::var(HOST_ENV)
            .ok()
            .and_then(|name| Self::from_name(&name))
            .unwrap_or_else(Self::native)
    }

    fn native() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "windows" => Some(Self::Windows),
            "macos" | "osx" => Some(Self::MacOs),
            "linux" => Some(Self::Linux),
            _ => None,
        }
    }

    /// Whether the game has a native executable a proxy shim can attach to
    pub fn supports_proxy(self) -> bool {
        self == Self::Windows
    }
}

/// Pristine copy location for an assembly
pub fn original_cache_path(assembly: &Path) -> PathBuf {
    let mut name = assembly.as_os_str().to_os_string();
    name.push(ORIGINAL_SUFFIX);
    PathBuf::from(name)
}

/// Resolved layout of one game installation
#[derive(Debug, Clone)]
pub struct InstallationContext {
    pub game: GameDefinition,
    pub host: HostPlatform,
    pub game_root: PathBuf,
    pub bundle_dir: PathBuf,
    pub managed_dir: PathBuf,
    /// `<Managed>/ModManager`
    pub manager_dir: PathBuf,
    pub manager_assembly: PathBuf,
    pub game_state_path: PathBuf,
    pub mods_dir: PathBuf,
    pub game_exe: Option<PathBuf>,
    pub entry_point: EntryPointSpec,
    pub entry_assembly: PathBuf,
    pub old_patch_target: Option<EntryPointSpec>,
    /// State written by the last successful install
    pub recorded: Option<GameState>,
    pub libraries: LibrarySync,
    pub proxy: ProxyLoader,
}

impl InstallationContext {
    /// Resolve the layout of `game_root` for `game`
    ///
    /// # Errors
    /// - [`ModhookError::InvalidGameDirectory`] if the directory cannot host
    ///   the game on this platform or contains the bundle
    /// - [`ModhookError::ManagedFolderNotFound`] if no managed folder exists
    /// - config errors for an invalid definition or state file
    pub fn build(
        game: &GameDefinition,
        game_root: &Path,
        bundle_dir: &Path,
        host: HostPlatform,
    ) -> Result<Self> {
        game.validate()?;
        let game_root = canonical_dir(game_root)?;
        let bundle_dir = canonical_dir(bundle_dir)?;

        if bundle_dir.starts_with(&game_root) {
            return Err(invalid_dir(
                &game_root,
                "the bundle directory must not be inside the game directory",
            ));
        }
        check_platform_layout(&game_root, host)?;

        let managed_dir = find_managed_folder(&game_root, host).ok_or_else(|| {
            ModhookError::ManagedFolderNotFound {
                path: game_root.display().to_string(),
            }
        })?;
        let manager_dir = managed_dir.join(MANAGER_DIR);
        let manager_assembly = manager_dir.join(MANAGER_ASSEMBLY);
        let game_state_path = manager_dir.join(GAME_STATE_FILE);

        let entry_point = game.entry_point()?;
        let entry_assembly = managed_dir.join(entry_point.assembly_file());
        let recorded = GameState::load(&game_state_path)?;
        let game_exe = resolve_game_exe(&game_root, game.game_exe.as_deref());

        let library_files = libraries::library_set(game.minimal_manager_version());
        let libraries = LibrarySync::new(&bundle_dir, &manager_dir, library_files.as_slice());
        let proxy = ProxyLoader::new(
            &bundle_dir,
            &game_root,
            game_exe.clone().unwrap_or_default(),
            &manager_assembly,
        );

        debug!(
            game = %game.name,
            managed = %managed_dir.display(),
            recorded = recorded.is_some(),
            "built installation context"
        );

        Ok(Self {
            game: game.clone(),
            host,
            mods_dir: game_root.join(&game.mods_directory),
            old_patch_target: game.old_patch_target()?,
            game_root,
            bundle_dir,
            managed_dir,
            manager_dir,
            manager_assembly,
            game_state_path,
            game_exe,
            entry_point,
            entry_assembly,
            recorded,
            libraries,
            proxy,
        })
    }

    /// Assembly file inside the managed folder that holds `spec`
    pub fn assembly_path(&self, spec: &EntryPointSpec) -> PathBuf {
        self.managed_dir.join(spec.assembly_file())
    }

    /// Bundled manager assembly shipped with this tool
    pub fn bundled_manager(&self) -> PathBuf {
        self.bundle_dir.join(MANAGER_ASSEMBLY)
    }

    /// Entry point a previous install recorded, if it parses
    pub fn recorded_entry_point(&self) -> Result<Option<EntryPointSpec>> {
        self.recorded
            .as_ref()
            .map(GameState::entry_point)
            .transpose()
    }
}

fn invalid_dir(path: &Path, reason: &str) -> ModhookError {
    ModhookError::InvalidGameDirectory {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() {
        return Err(invalid_dir(path, "directory does not exist"));
    }
    dunce::canonicalize(path)
        .map_err(|e| crate::error::fs::read_failed(path.display().to_string(), e.to_string()))
}

fn check_platform_layout(game_root: &Path, host: HostPlatform) -> Result<()> {
    match host {
        HostPlatform::Windows => {
            let has_exe = fs::read_dir(game_root)
                .map(|entries| {
                    entries.filter_map(std::result::Result::ok).any(|e| {
                        e.path()
                            .extension()
                            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
                    })
                })
                .unwrap_or(false);
            if !has_exe {
                return Err(invalid_dir(
                    game_root,
                    "select the directory that contains the game executable",
                ));
            }
        }
        HostPlatform::MacOs => {
            let is_app = game_root
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("app"));
            if !is_app {
                return Err(invalid_dir(game_root, "select the game's .app bundle"));
            }
        }
        HostPlatform::Linux => {}
    }
    Ok(())
}

/// First directory named `*Managed` that holds a game assembly
///
/// Symlinked directories are skipped. On macOS the application bundle
/// layout is tried first.
pub fn find_managed_folder(game_root: &Path, host: HostPlatform) -> Option<PathBuf> {
    if host == HostPlatform::MacOs {
        let bundled = game_root.join(MACOS_MANAGED);
        if bundled.is_dir() {
            return Some(bundled);
        }
    }

    WalkDir::new(game_root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_dir())
        .filter(|e| e.file_name().to_string_lossy().ends_with("Managed"))
        .map(walkdir::DirEntry::into_path)
        .find(|dir| MANAGED_MARKERS.iter().any(|m| dir.join(m).is_file()))
}

/// Locate the game executable; `pattern` may be a glob over the top directory
fn resolve_game_exe(game_root: &Path, pattern: Option<&str>) -> Option<PathBuf> {
    let pattern = pattern.map(str::trim).filter(|p| !p.is_empty())?;

    if !pattern.contains(['*', '?', '[', '{']) {
        return Some(game_root.join(pattern));
    }

    let glob = Glob::new(pattern).ok()?;
    let mut names: Vec<String> = fs::read_dir(game_root)
        .ok()?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| glob.matched(&CandidatePath::from(name.as_str())).is_some())
        .collect();
    names.sort();
    names.into_iter().next().map(|name| game_root.join(name))
}
