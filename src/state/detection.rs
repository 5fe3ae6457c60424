//! Installation detection
//!
//! Derives an [`InstallationRecord`] from the files on disk. Nothing is
//! persisted; every command detects afresh.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::entry_point::EntryPointSpec;
use crate::error::Result;
use crate::installer::permissions::WriteAccess;
use crate::module::Module;
use crate::patcher::{self, LEGACY_MANAGER_FULL_NAME, LEGACY_VERSION_FIELD, MarkerKind};
use crate::transaction;

use super::context::{InstallationContext, original_cache_path};
use super::version::Version;
use super::InstallType;

/// Whether an install type can be chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    /// Exists on this platform but blocked by the other type being active
    Disabled,
    /// Not applicable on this platform or for this game
    Hidden,
}

/// Manager found in the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstalledManager {
    /// `None` if a legacy install carries an unreadable version
    pub version: Option<Version>,
    /// Installed by a release that copied the whole manager type
    pub legacy: bool,
}

/// Detected state of one game installation
#[derive(Debug, Clone, Serialize)]
pub struct InstallationRecord {
    /// Type the next action applies to
    pub install_type: InstallType,
    pub assembly: Availability,
    pub proxy: Availability,
    pub has_injected_assembly: bool,
    pub proxy_present: bool,
    /// Entry point the existing patch lives at (or would be removed from)
    pub injected_entry_point: String,
    pub injected_assembly: PathBuf,
    /// The patch was found at the game's old patch target
    pub migrated: bool,
    /// The patch lives at the configured entry point
    pub entry_point_matches: bool,
    pub installed: Option<InstalledManager>,
    pub tool_version: Version,
    pub can_install: bool,
    pub can_remove: bool,
    pub can_restore_original: bool,
    /// Backups left by an interrupted action
    pub pending_backups: Vec<PathBuf>,
    /// Paths the next action could not write
    pub denied: Vec<PathBuf>,
}

impl InstallationRecord {
    pub fn availability(&self, install_type: InstallType) -> Availability {
        match install_type {
            InstallType::Assembly => self.assembly,
            InstallType::DoorstopProxy => self.proxy,
        }
    }

    pub fn injected_entry_point(&self) -> Result<EntryPointSpec> {
        EntryPointSpec::parse(&self.injected_entry_point)
    }

    pub fn is_writable(&self) -> bool {
        self.denied.is_empty()
    }
}

/// A loaded assembly and where it came from
#[derive(Debug, Clone)]
pub struct LoadedAssembly {
    pub path: PathBuf,
    pub module: Module,
}

/// Detect the state of `ctx`, preferring `requested` as the install type
/// where both are available
///
/// # Errors
/// Fails if the entry assembly or the bundled manager cannot be loaded.
/// Problems with optional files disable the affected options instead.
pub fn detect(ctx: &InstallationContext, requested: Option<InstallType>) -> Result<InstallationRecord> {
    let entry = Module::load_file(&ctx.entry_assembly)?;
    let tool_version = Version::from(Module::load_file(&ctx.bundled_manager())?.version);

    let injected = locate_injected(ctx, &entry)?;
    let marker = patcher::marker_kind(&injected.target.module);
    let has_injected_assembly = marker.is_some();

    let proxy_present = ctx.proxy.is_installed();
    let mut assembly = Availability::Available;
    let mut proxy = Availability::Available;
    let mut forced = None;

    let exe_present = ctx.game_exe.as_deref().is_some_and(Path::is_file);
    if !ctx.host.supports_proxy() || !exe_present {
        proxy = Availability::Hidden;
        forced = Some(InstallType::Assembly);
    } else if proxy_present {
        assembly = Availability::Disabled;
        forced = Some(InstallType::DoorstopProxy);
    }
    if has_injected_assembly {
        if proxy != Availability::Hidden {
            proxy = Availability::Disabled;
        }
        forced = Some(InstallType::Assembly);
    }
    let install_type = forced.or(requested).unwrap_or_default();

    let manager = load_manager(ctx, &injected.target.module);
    let manager_type = manager.find_type(LEGACY_MANAGER_FULL_NAME);

    let (installed, can_install, can_remove) = match manager_type {
        Some(manager_type)
            if has_injected_assembly || install_type == InstallType::DoorstopProxy =>
        {
            let legacy = marker == Some(MarkerKind::Legacy);
            let version = if legacy {
                manager_type
                    .constant_string(LEGACY_VERSION_FIELD)
                    .as_deref()
                    .and_then(Version::parse)
            } else {
                Some(Version::from(manager.version))
            };
            let can_install = !legacy && version.is_some_and(|v| tool_version > v);
            (Some(InstalledManager { version, legacy }), can_install, true)
        }
        _ => (None, true, has_injected_assembly || proxy_present),
    };

    let can_restore_original = install_type == InstallType::Assembly
        && patcher::is_dirty(&injected.target.module)
        && original_cache_path(&injected.target.path).is_file();

    let pending_backups = transaction::pending_backups(&touched_paths(ctx, &injected.target.path));
    let denied = write_access(ctx, install_type, &injected.target.path)
        .denied()
        .into_iter()
        .map(Path::to_path_buf)
        .collect();

    let record = InstallationRecord {
        install_type,
        assembly,
        proxy,
        has_injected_assembly,
        proxy_present,
        entry_point_matches: injected.entry_point.same_method(&ctx.entry_point),
        injected_entry_point: injected.entry_point.to_string(),
        injected_assembly: injected.target.path,
        migrated: injected.migrated,
        installed,
        tool_version,
        can_install,
        can_remove,
        can_restore_original,
        pending_backups,
        denied,
    };
    debug!(?record, "detected installation");
    Ok(record)
}

/// Find the assembly carrying the patch
///
/// A recorded entry point is trusted as long as its assembly exists. Without
/// one the configured entry point is tried, then once the game's old patch
/// target.
fn locate_injected(
    ctx: &InstallationContext,
    entry: &Module,
) -> Result<patcher::Located<LoadedAssembly>> {
    let recorded = match ctx.recorded_entry_point() {
        Ok(recorded) => recorded,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable recorded entry point");
            None
        }
    };
    let recorded = recorded.filter(|spec| {
        let path = ctx.assembly_path(spec);
        let present = path == ctx.entry_assembly || path.is_file();
        if !present {
            warn!(
                entry_point = %spec,
                path = %path.display(),
                "recorded entry point assembly is missing, using the configured entry point"
            );
        }
        present
    });
    let (configured, legacy) = match &recorded {
        Some(recorded) => (recorded, None),
        None => (&ctx.entry_point, ctx.old_patch_target.as_ref()),
    };

    patcher::locate_patch(
        configured,
        legacy,
        |spec| {
            let path = ctx.assembly_path(spec);
            let module = if path == ctx.entry_assembly {
                entry.clone()
            } else {
                Module::load_file(&path)?
            };
            Ok(LoadedAssembly { path, module })
        },
        |spec, loaded| patcher::has_patch(&loaded.module, spec),
    )
}

/// Installed manager assembly, or the patched assembly when there is none
fn load_manager(ctx: &InstallationContext, injected: &Module) -> Module {
    if ctx.manager_assembly.is_file() {
        match Module::load_file(&ctx.manager_assembly) {
            Ok(module) => return module,
            Err(e) => warn!(error = %e, "installed manager is unreadable"),
        }
    }
    injected.clone()
}

/// Every path an install or remove may change
pub fn touched_paths(ctx: &InstallationContext, injected_assembly: &Path) -> Vec<PathBuf> {
    let mut paths = vec![
        ctx.entry_assembly.clone(),
        original_cache_path(&ctx.entry_assembly),
    ];
    if injected_assembly != ctx.entry_assembly {
        paths.push(injected_assembly.to_path_buf());
    }
    paths.push(ctx.game_state_path.clone());
    paths.extend(ctx.libraries.destinations());
    paths.extend(ctx.proxy.paths());
    paths
}

/// Paths that must be writable before an action of `install_type` starts
pub fn write_access(
    ctx: &InstallationContext,
    install_type: InstallType,
    injected_assembly: &Path,
) -> WriteAccess {
    let access = WriteAccess::new()
        .dir(&ctx.managed_dir)
        .file(&ctx.manager_assembly)
        .file(&ctx.game_state_path)
        .files(ctx.libraries.destinations());

    match install_type {
        InstallType::DoorstopProxy => access.file(ctx.proxy.shim_path()),
        InstallType::Assembly if injected_assembly != ctx.entry_assembly => access
            .file(&ctx.entry_assembly)
            .file(injected_assembly),
        InstallType::Assembly => access.file(&ctx.entry_assembly),
    }
}

#[cfg(test)]
mod tests;
