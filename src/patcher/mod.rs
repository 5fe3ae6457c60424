//! Assembly patcher
//!
//! Injects and removes the bootstrap call. A module is *clean* until
//! [`inject`] adds the marker type and a `call` to its start routine at the
//! entry point; [`remove`] takes both out again, leaving the types and method
//! bodies as they were before injection.
//!
//! Two generations of patches exist in the wild:
//! - current: the marker type [`MARKER_FULL_NAME`]
//! - legacy: the whole manager type [`LEGACY_MANAGER_FULL_NAME`] was copied in
//!
//! Either one makes a module dirty. Both may be present during a migration,
//! so the check accepts either marker. A dirty module is only *patched at* an
//! entry point when that method also holds the marker's call; see
//! [`has_patch`].

pub mod migration;
mod template;

use tracing::debug;

use crate::entry_point::EntryPointSpec;
use crate::error::{ModhookError, Result};
use crate::module::{Instruction, MemberRef, Module};

pub use migration::{Located, locate_patch};

/// Full name of the marker type
pub const MARKER_FULL_NAME: &str = "ModManager.Injection.ModManagerStarter";

/// Start routine on the marker type
pub const MARKER_START: &str = "Start";

/// Full name of the manager type injected by legacy releases
pub const LEGACY_MANAGER_FULL_NAME: &str = "ModManager.ModManager";

/// Start routine on the legacy manager type
pub const LEGACY_START: &str = "Start";

/// Constant field holding the legacy manager version
pub const LEGACY_VERSION_FIELD: &str = "version";

/// Which marker a patched module carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Current,
    Legacy,
}

/// Result of [`remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// A patch was found and taken out
    Removed(MarkerKind),
    /// The module carried no patch
    NotPatched,
}

/// Whether the module carries either marker
#[must_use]
pub fn is_dirty(module: &Module) -> bool {
    marker_kind(module).is_some()
}

/// The marker present in `module`, preferring the current one
#[must_use]
pub fn marker_kind(module: &Module) -> Option<MarkerKind> {
    if module.find_type(MARKER_FULL_NAME).is_some() {
        Some(MarkerKind::Current)
    } else if module.find_type(LEGACY_MANAGER_FULL_NAME).is_some() {
        Some(MarkerKind::Legacy)
    } else {
        None
    }
}

/// Whether `module` is dirty and the method `spec` names holds a bootstrap call
///
/// A marker alone is not enough: the call may live at another entry point of
/// the same assembly, which removal at `spec` could not take out.
#[must_use]
pub fn has_patch(module: &Module, spec: &EntryPointSpec) -> bool {
    if !is_dirty(module) {
        return false;
    }
    let Some(method) = spec
        .resolve(module)
        .ok()
        .and_then(|resolved| resolved.method(module))
    else {
        return false;
    };
    [bootstrap_call(), legacy_call()]
        .iter()
        .any(|call| method.position_of(call).is_some())
}

/// The call instruction that the current marker's injection inserts
#[must_use]
pub fn bootstrap_call() -> Instruction {
    Instruction::call(MemberRef::new(MARKER_FULL_NAME, MARKER_START))
}

/// The call instruction legacy releases inserted
#[must_use]
pub fn legacy_call() -> Instruction {
    Instruction::call(MemberRef::new(LEGACY_MANAGER_FULL_NAME, LEGACY_START))
}

/// The call `kind`'s injection inserts
#[must_use]
pub fn marker_call(kind: MarkerKind) -> Instruction {
    match kind {
        MarkerKind::Current => bootstrap_call(),
        MarkerKind::Legacy => legacy_call(),
    }
}

/// Inject the marker type and the bootstrap call at `spec`
///
/// The entry point is resolved before anything changes, so a failure leaves
/// `module` untouched.
///
/// # Errors
/// - [`ModhookError::AlreadyPatched`] if the module is already dirty
/// - [`ModhookError::EntryPointNotFound`] if `spec` does not resolve
pub fn inject(module: &mut Module, spec: &EntryPointSpec) -> Result<()> {
    if is_dirty(module) {
        return Err(ModhookError::AlreadyPatched {
            name: module.name.clone(),
        });
    }

    let resolved = spec.resolve(module)?;
    let starter = template::starter_type()?;
    let call = Instruction::call(starter.member_ref(MARKER_START));

    let Some(method) = resolved.method_mut(module) else {
        return Err(crate::error::module::entry_point_not_found(
            spec.to_string(),
            "resolved method disappeared",
        ));
    };
    let offset = resolved.insertion.offset(method.body.len());
    method.body.insert(offset, call);
    module.add_type(starter);

    debug!(
        module = %module.name,
        entry_point = %spec,
        offset,
        "injected bootstrap call"
    );
    Ok(())
}

/// Remove the bootstrap call and the marker type
///
/// # Errors
/// Returns [`ModhookError::EntryPointNotFound`] if the module is patched but
/// `spec` does not resolve, or the method it names holds no bootstrap call;
/// the module is left untouched in both cases.
pub fn remove(module: &mut Module, spec: &EntryPointSpec) -> Result<RemoveOutcome> {
    let Some(kind) = marker_kind(module) else {
        return Ok(RemoveOutcome::NotPatched);
    };
    let marker = match kind {
        MarkerKind::Current => MARKER_FULL_NAME,
        MarkerKind::Legacy => LEGACY_MANAGER_FULL_NAME,
    };
    let call = marker_call(kind);

    let resolved = spec.resolve(module)?;
    let Some(method) = resolved.method_mut(module) else {
        return Err(crate::error::module::entry_point_not_found(
            spec.to_string(),
            "resolved method disappeared",
        ));
    };
    let Some(index) = method.position_of(&call) else {
        return Err(crate::error::module::entry_point_not_found(
            spec.to_string(),
            format!("no call to {marker} in the method"),
        ));
    };
    method.body.remove(index);

    module.remove_type(marker);
    debug!(module = %module.name, ?kind, "removed bootstrap patch");
    Ok(RemoveOutcome::Removed(kind))
}
