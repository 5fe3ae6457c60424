//! Validation schema for game definitions
//!
//! Each checked field is listed once with the rule it must satisfy. Fields not
//! listed (`game_exe`, `comment`) are free-form.

use crate::entry_point::EntryPointSpec;
use crate::state::version::Version;

use super::games::GameDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Must be present and non-empty
    NonEmpty,
    /// Must be a parseable entry point
    EntryPoint,
    /// Empty or a parseable entry point
    OptionalEntryPoint,
    /// Empty or a parseable version
    OptionalVersion,
}

pub const GAME_SCHEMA: &[(&str, Rule)] = &[
    ("name", Rule::NonEmpty),
    ("folder", Rule::NonEmpty),
    ("mods_directory", Rule::NonEmpty),
    ("entry_point", Rule::EntryPoint),
    ("old_patch_target", Rule::OptionalEntryPoint),
    ("minimal_manager_version", Rule::OptionalVersion),
];

impl Rule {
    /// Problem with `value`, if any
    pub fn check(self, value: Option<&str>) -> Option<String> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        match (self, value) {
            (Self::NonEmpty | Self::EntryPoint, None) => Some("is empty".to_string()),
            (Self::NonEmpty, Some(_))
            | (Self::OptionalEntryPoint | Self::OptionalVersion, None) => None,
            (Self::EntryPoint | Self::OptionalEntryPoint, Some(v)) => EntryPointSpec::parse(v)
                .err()
                .map(|_| format!("is not a valid entry point: '{v}'")),
            (Self::OptionalVersion, Some(v)) => match Version::parse(v) {
                Some(_) => None,
                None => Some(format!("is not a valid version: '{v}'")),
            },
        }
    }
}

/// Every schema violation of `game`, as `field message` lines
pub fn violations(game: &GameDefinition) -> Vec<String> {
    GAME_SCHEMA
        .iter()
        .filter_map(|(field, rule)| {
            rule.check(game.field(field))
                .map(|problem| format!("{field} {problem}"))
        })
        .collect()
}
