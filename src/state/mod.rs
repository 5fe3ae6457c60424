//! Installation state machine
//!
//! A refresh builds an [`InstallationContext`] for one game directory, then
//! [`detect`] derives an [`InstallationRecord`]: which strategy is active,
//! which ones may be chosen, and what version is installed. The actions in
//! [`actions`] take both and run one transaction each.

pub mod actions;
pub mod context;
pub mod detection;
pub mod version;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use context::{HostPlatform, InstallationContext};
pub use detection::{Availability, InstallationRecord, InstalledManager, detect};
pub use version::Version;

/// How the bootstrap is activated in a game
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum, Default,
)]
pub enum InstallType {
    /// Shim library next to the executable loads the manager
    #[value(name = "proxy")]
    DoorstopProxy,
    /// Bootstrap call patched into a game assembly
    #[default]
    #[value(name = "assembly")]
    Assembly,
}

impl fmt::Display for InstallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoorstopProxy => write!(f, "DoorstopProxy"),
            Self::Assembly => write!(f, "Assembly"),
        }
    }
}
