//! Locating an existing patch across entry point generations
//!
//! Games sometimes move their entry point between releases. An installation
//! patched at the old location must still be found so it can be removed. The
//! search tries the configured entry point, then at most once the legacy one.

use tracing::debug;

use crate::entry_point::EntryPointSpec;
use crate::error::Result;

/// Where the search currently stands
#[derive(Debug, Clone, Copy)]
enum Attempt<'a> {
    Configured,
    Legacy(&'a EntryPointSpec),
    Exhausted,
}

/// A target together with the entry point it was loaded for
#[derive(Debug)]
pub struct Located<T> {
    pub entry_point: EntryPointSpec,
    pub target: T,
    /// `true` when the patch was found at the legacy entry point
    pub migrated: bool,
}

/// Find the target carrying the patch
///
/// `load` turns an entry point into a target (typically the loaded assembly
/// that contains it); `has_patch` tells whether a target is patched at that
/// entry point. The
/// configured target is returned when it is patched, when there is no legacy
/// entry point, or when the legacy one is not patched either.
///
/// # Errors
/// Only a failure to load the configured target is reported; a legacy target
/// that cannot be loaded counts as unpatched.
pub fn locate_patch<T, L, P>(
    configured: &EntryPointSpec,
    legacy: Option<&EntryPointSpec>,
    mut load: L,
    has_patch: P,
) -> Result<Located<T>>
where
    L: FnMut(&EntryPointSpec) -> Result<T>,
    P: Fn(&EntryPointSpec, &T) -> bool,
{
    let mut attempt = Attempt::Configured;
    let mut configured_target = None;

    loop {
        attempt = match attempt {
            Attempt::Configured => {
                let target = load(configured)?;
                match legacy {
                    Some(legacy) if !has_patch(configured, &target) => {
                        configured_target = Some(target);
                        Attempt::Legacy(legacy)
                    }
                    _ => {
                        return Ok(Located {
                            entry_point: configured.clone(),
                            target,
                            migrated: false,
                        });
                    }
                }
            }
            Attempt::Legacy(legacy) => match load(legacy) {
                Ok(target) if has_patch(legacy, &target) => {
                    debug!(entry_point = %legacy, "patch found at legacy entry point");
                    return Ok(Located {
                        entry_point: legacy.clone(),
                        target,
                        migrated: true,
                    });
                }
                Ok(_) => Attempt::Exhausted,
                Err(e) => {
                    debug!(entry_point = %legacy, error = %e, "legacy entry point unavailable");
                    Attempt::Exhausted
                }
            },
            Attempt::Exhausted => {
                if let Some(target) = configured_target.take() {
                    return Ok(Located {
                        entry_point: configured.clone(),
                        target,
                        migrated: false,
                    });
                }
                // Exhausted is only reached after the configured target was stored
                let target = load(configured)?;
                return Ok(Located {
                    entry_point: configured.clone(),
                    target,
                    migrated: false,
                });
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn spec(s: &str) -> EntryPointSpec {
        EntryPointSpec::parse(s).unwrap()
    }

    #[test]
    fn test_configured_patched_wins() {
        let configured = spec("[A.dll]Game.New.Main");
        let legacy = spec("[B.dll]Game.Old.Main");
        let calls = RefCell::new(Vec::new());

        let located = locate_patch(
            &configured,
            Some(&legacy),
            |ep| {
                calls.borrow_mut().push(ep.to_string());
                Ok(ep.assembly_file().to_string())
            },
            |_, _| true,
        )
        .unwrap();

        assert_eq!(located.target, "A.dll");
        assert!(!located.migrated);
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn test_falls_back_to_legacy_once() {
        let configured = spec("[A.dll]Game.New.Main");
        let legacy = spec("[B.dll]Game.Old.Main");
        let calls = RefCell::new(0);

        let located = locate_patch(
            &configured,
            Some(&legacy),
            |ep| {
                *calls.borrow_mut() += 1;
                Ok(ep.assembly_file().to_string())
            },
            |_, target: &String| target == "B.dll",
        )
        .unwrap();

        assert_eq!(located.target, "B.dll");
        assert_eq!(located.entry_point, legacy);
        assert!(located.migrated);
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn test_neither_patched_returns_configured() {
        let configured = spec("[A.dll]Game.New.Main");
        let legacy = spec("[B.dll]Game.Old.Main");
        let calls = RefCell::new(0);

        let located = locate_patch(
            &configured,
            Some(&legacy),
            |ep| {
                *calls.borrow_mut() += 1;
                Ok(ep.assembly_file().to_string())
            },
            |_, _| false,
        )
        .unwrap();

        assert_eq!(located.target, "A.dll");
        assert!(!located.migrated);
        // configured, then one legacy retry, never more
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn test_legacy_load_failure_is_not_fatal() {
        let configured = spec("[A.dll]Game.New.Main");
        let legacy = spec("[B.dll]Game.Old.Main");

        let located = locate_patch(
            &configured,
            Some(&legacy),
            |ep| {
                if ep.assembly_file() == "B.dll" {
                    Err(crate::error::fs::not_found("B.dll"))
                } else {
                    Ok(ep.assembly_file().to_string())
                }
            },
            |_, _| false,
        )
        .unwrap();

        assert_eq!(located.target, "A.dll");
    }

    #[test]
    fn test_configured_load_failure_is_reported() {
        let configured = spec("[A.dll]Game.New.Main");

        let result: Result<Located<String>> = locate_patch(
            &configured,
            None,
            |_| Err(crate::error::fs::not_found("A.dll")),
            |_, _| true,
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_same_assembly_checks_each_entry_point() {
        let configured = spec("[A.dll]Game.Menu.Awake");
        let legacy = spec("[A.dll]Game.Menu.Update");

        // one file, patched only in Update
        let located = locate_patch(
            &configured,
            Some(&legacy),
            |ep| Ok(ep.assembly_file().to_string()),
            |ep, _| ep.method() == "Update",
        )
        .unwrap();

        assert_eq!(located.entry_point, legacy);
        assert!(located.migrated);
    }
}
