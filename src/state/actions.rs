//! Install, remove and restore actions
//!
//! Each action checks its preconditions against a fresh
//! [`InstallationRecord`], checks write access, then runs all of its file
//! changes inside one [`BackupSet`]. Any failure after the transaction began
//! restores every touched path and is reported as
//! [`ModhookError::ActionFailed`](crate::error::ModhookError::ActionFailed).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::config::GameState;
use crate::error::{self, Result};
use crate::installer::{Bitness, SyncReport, remove_if_present};
use crate::module::Module;
use crate::patcher::{self, RemoveOutcome};
use crate::transaction::{self, BackupSet};

use super::context::{InstallationContext, original_cache_path};
use super::detection::{Availability, InstallationRecord, touched_paths, write_access};
use super::version::Version;
use super::InstallType;

/// What a successful install did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSummary {
    pub install_type: InstallType,
    pub version: Version,
    pub libraries: SyncReport,
    /// Shim flavour, for proxy installs
    pub bitness: Option<Bitness>,
    /// A previous patch was taken out first
    pub replaced_patch: bool,
}

/// What a successful remove did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveSummary {
    pub install_type: InstallType,
    pub patch_removed: bool,
    pub libraries_removed: usize,
}

/// Install the manager with `install_type`
///
/// An existing patch is removed first, from wherever detection found it,
/// so an update or a migration leaves exactly one bootstrap call behind.
///
/// # Errors
/// - [`ModhookError::InstallTypeUnavailable`](crate::error::ModhookError::InstallTypeUnavailable)
///   if `install_type` is hidden or disabled
/// - [`ModhookError::InstallBlocked`](crate::error::ModhookError::InstallBlocked)
///   if the installed manager is legacy or not older than this tool
/// - [`ModhookError::FileAccess`](crate::error::ModhookError::FileAccess)
///   before anything is touched
/// - [`ModhookError::ActionFailed`](crate::error::ModhookError::ActionFailed)
///   after a failed step was rolled back
pub fn install(
    ctx: &InstallationContext,
    record: &InstallationRecord,
    install_type: InstallType,
) -> Result<InstallSummary> {
    match record.availability(install_type) {
        Availability::Available => {}
        Availability::Disabled => {
            return Err(error::install::type_unavailable(
                install_type,
                "remove the other install type first",
            ));
        }
        Availability::Hidden => {
            return Err(error::install::type_unavailable(
                install_type,
                "not supported for this game on this platform",
            ));
        }
    }
    if !record.can_install {
        let reason = match record.installed {
            Some(installed) if installed.legacy => {
                "a legacy manager is installed, remove it first".to_string()
            }
            Some(installed) => format!(
                "version {} is installed and this tool ships {}",
                installed.version.map_or_else(|| "?".to_string(), |v| v.to_string()),
                record.tool_version
            ),
            None => "the installation is not in an installable state".to_string(),
        };
        return Err(error::install::blocked("Install", reason));
    }

    write_access(ctx, install_type, &record.injected_assembly).check()?;

    info!(game = %ctx.game.name, %install_type, "installing");
    run_transaction("Install", &touched_paths(ctx, &record.injected_assembly), |backups| {
        create_tracked_dir(backups, &ctx.mods_dir)?;
        create_tracked_dir(backups, &ctx.manager_dir)?;

        let mut replaced_patch = false;
        let mut bitness = None;
        match install_type {
            InstallType::Assembly => replaced_patch = patch_entry_assembly(ctx, record)?,
            InstallType::DoorstopProxy => bitness = Some(ctx.proxy.install()?),
        }

        let libraries = ctx.libraries.install()?;
        GameState {
            game: ctx.game.name.clone(),
            entry_point: ctx.entry_point.to_string(),
            install_type,
            manager_version: record.tool_version,
        }
        .save(&ctx.game_state_path)?;

        Ok(InstallSummary {
            install_type,
            version: record.tool_version,
            libraries,
            bitness,
            replaced_patch,
        })
    })
}

/// Take out any existing patch, then inject at the configured entry point
///
/// Returns whether a previous patch was removed.
fn patch_entry_assembly(ctx: &InstallationContext, record: &InstallationRecord) -> Result<bool> {
    let mut entry = Module::load_file(&ctx.entry_assembly)?;
    if !patcher::is_dirty(&entry) {
        let cache = original_cache_path(&ctx.entry_assembly);
        fs::copy(&ctx.entry_assembly, &cache)
            .map_err(|e| error::fs::write_failed(cache.display().to_string(), e.to_string()))?;
        debug!(cache = %cache.display(), "kept pristine copy");
    }

    let previous = record.injected_entry_point()?;
    let outcome = if record.injected_assembly == ctx.entry_assembly {
        patcher::remove(&mut entry, &previous)?
    } else {
        let mut injected = Module::load_file(&record.injected_assembly)?;
        let outcome = patcher::remove(&mut injected, &previous)?;
        if outcome != RemoveOutcome::NotPatched {
            write_unpatched(&injected, &record.injected_assembly)?;
            info!(
                assembly = %record.injected_assembly.display(),
                "removed patch from previous location"
            );
        }
        outcome
    };

    patcher::inject(&mut entry, &ctx.entry_point)?;
    entry.write_file(&ctx.entry_assembly)?;
    info!(entry_point = %ctx.entry_point, "patched");

    Ok(outcome != RemoveOutcome::NotPatched)
}

/// Write an assembly the patch was just taken out of
///
/// A rewritten image differs in layout from the one the game shipped. When
/// the pristine copy kept on first patch holds the same module, its bytes are
/// put back instead.
fn write_unpatched(module: &Module, path: &Path) -> Result<()> {
    let cache = original_cache_path(path);
    if cache.is_file() {
        match Module::load_file(&cache) {
            Ok(original) if original == *module => {
                fs::copy(&cache, path)
                    .map_err(|e| error::fs::write_failed(path.display().to_string(), e.to_string()))?;
                debug!(assembly = %path.display(), "restored pristine bytes");
                return Ok(());
            }
            Ok(_) => debug!(cache = %cache.display(), "pristine copy differs, rewriting"),
            Err(e) => warn!(cache = %cache.display(), error = %e, "pristine copy is unreadable"),
        }
    }
    module.write_file(path)
}

/// Remove whatever is installed
///
/// # Errors
/// - [`ModhookError::InstallBlocked`](crate::error::ModhookError::InstallBlocked)
///   if nothing is installed
/// - [`ModhookError::FileAccess`](crate::error::ModhookError::FileAccess)
///   before anything is touched
/// - [`ModhookError::ActionFailed`](crate::error::ModhookError::ActionFailed)
///   after a failed step was rolled back
pub fn remove(ctx: &InstallationContext, record: &InstallationRecord) -> Result<RemoveSummary> {
    if !record.can_remove {
        return Err(error::install::blocked("Remove", "nothing is installed"));
    }
    write_access(ctx, record.install_type, &record.injected_assembly).check()?;

    info!(game = %ctx.game.name, install_type = %record.install_type, "removing");
    let summary = run_transaction(
        "Remove",
        &touched_paths(ctx, &record.injected_assembly),
        |_backups| {
            let mut patch_removed = false;
            if record.has_injected_assembly {
                let mut injected = Module::load_file(&record.injected_assembly)?;
                let outcome = patcher::remove(&mut injected, &record.injected_entry_point()?)?;
                if outcome != RemoveOutcome::NotPatched {
                    write_unpatched(&injected, &record.injected_assembly)?;
                    patch_removed = true;
                }
            }
            if record.proxy_present {
                ctx.proxy.remove()?;
            }
            let libraries_removed = ctx.libraries.remove()?;
            remove_if_present(&ctx.game_state_path)?;

            Ok(RemoveSummary {
                install_type: record.install_type,
                patch_removed,
                libraries_removed,
            })
        },
    )?;

    // Outside the transaction: an abort would need the directory back
    if fs::remove_dir(&ctx.manager_dir).is_ok() {
        debug!(dir = %ctx.manager_dir.display(), "removed empty manager directory");
    }
    Ok(summary)
}

/// Put the pristine copy kept on first patch back over the patched assembly
///
/// The copy is consumed. Libraries and the state file are left alone.
///
/// # Errors
/// - [`ModhookError::InstallBlocked`](crate::error::ModhookError::InstallBlocked)
///   if there is no patched assembly with a pristine copy
/// - [`ModhookError::FileAccess`](crate::error::ModhookError::FileAccess)
///   before anything is touched
pub fn restore_original(ctx: &InstallationContext, record: &InstallationRecord) -> Result<PathBuf> {
    if !record.can_restore_original {
        return Err(error::install::blocked(
            "Restore",
            "no pristine copy of a patched assembly exists",
        ));
    }
    let assembly = record.injected_assembly.clone();
    let cache = original_cache_path(&assembly);
    write_access(ctx, InstallType::Assembly, &assembly)
        .file(&cache)
        .check()?;

    run_transaction("Restore", &[assembly.clone(), cache.clone()], |_backups| {
        fs::copy(&cache, &assembly)
            .map_err(|e| error::fs::write_failed(assembly.display().to_string(), e.to_string()))?;
        remove_if_present(&cache)?;
        info!(assembly = %assembly.display(), "restored pristine assembly");
        Ok(())
    })?;
    Ok(assembly)
}

/// Backups left by an interrupted action anywhere in the installation
///
/// Works without detection, which may fail on a half-written assembly.
pub fn pending_backups(ctx: &InstallationContext) -> Vec<PathBuf> {
    let mut paths = touched_paths(ctx, &ctx.entry_assembly);
    let recorded = ctx.recorded_entry_point().ok().flatten();
    for spec in [ctx.old_patch_target.as_ref(), recorded.as_ref()].into_iter().flatten() {
        let assembly = ctx.assembly_path(spec);
        paths.push(original_cache_path(&assembly));
        paths.push(assembly);
    }
    transaction::pending_backups(&paths)
}

/// Copy backups left by an interrupted action back over their files
///
/// # Errors
/// Returns the first [`ModhookError::BackupRestore`](crate::error::ModhookError::BackupRestore).
pub fn recover_backups(ctx: &InstallationContext) -> Result<usize> {
    let pending = pending_backups(ctx);
    if pending.is_empty() {
        return Ok(0);
    }
    let restored = transaction::recover(&pending)?;
    info!(restored, "recovered interrupted action");
    Ok(restored)
}

/// Run `body` inside a transaction over `paths`
///
/// Commits on success. On failure every path is restored and the failure is
/// reported as an action failure; restore problems are only logged.
fn run_transaction<T>(
    action: &str,
    paths: &[PathBuf],
    body: impl FnOnce(&mut BackupSet) -> Result<T>,
) -> Result<T> {
    let mut backups = BackupSet::begin(paths)?;
    match body(&mut backups) {
        Ok(value) => {
            backups.commit();
            Ok(value)
        }
        Err(e) => {
            warn!(action, error = %e, "action failed, restoring files");
            if let Err(restore) = backups.abort() {
                error!(action, error = %restore, "could not restore every file");
            }
            Err(error::install::action_failed(action, e.to_string()))
        }
    }
}

fn create_tracked_dir(backups: &mut BackupSet, dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir)
        .map_err(|e| error::fs::write_failed(dir.display().to_string(), e.to_string()))?;
    backups.track_dir_created(dir);
    Ok(())
}
