//! Error types and handling for modhook
//!
//! Uses `thiserror` for error definitions and `miette` for pretty diagnostics.
//!
//! This module is organized into sub-modules by error domain:
//! - [`module`]: Assembly loading and entry point errors
//! - [`fs`]: File system and backup errors
//! - [`config`]: Game definition and state file errors
//! - [`install`]: Installation and action errors

pub mod config;
pub mod fs;
pub mod install;
pub mod module;

use miette::Diagnostic;
use thiserror::Error;

/// Main error type for modhook operations
#[derive(Error, Diagnostic, Debug)]
pub enum ModhookError {
    // Module errors
    #[error("Failed to load assembly '{path}': {reason}")]
    #[diagnostic(
        code(modhook::module::load_failed),
        help("The file is not a valid managed module image or could not be read")
    )]
    AssemblyLoad { path: String, reason: String },

    #[error("Invalid entry point '{spec}': {reason}")]
    #[diagnostic(
        code(modhook::entry_point::invalid),
        help("Entry points look like [Assembly-CSharp.dll]Namespace.Type.Method:After")
    )]
    EntryPointInvalid { spec: String, reason: String },

    #[error("Entry point '{spec}' not found: {reason}")]
    #[diagnostic(
        code(modhook::entry_point::not_found),
        help("Check that the game definition matches the installed game version")
    )]
    EntryPointNotFound { spec: String, reason: String },

    #[error("Assembly '{name}' is already patched")]
    #[diagnostic(code(modhook::patch::already_patched))]
    AlreadyPatched { name: String },

    // File system errors
    #[error("Insufficient permissions to write: {path}")]
    #[diagnostic(
        code(modhook::fs::access_denied),
        help("Close the game and make sure the files are not read-only")
    )]
    FileAccess { path: String },

    #[error("File not found: {path}")]
    #[diagnostic(code(modhook::fs::not_found))]
    FileNotFound { path: String },

    #[error("Failed to read file: {path}: {reason}")]
    #[diagnostic(code(modhook::fs::read_failed))]
    FileReadFailed { path: String, reason: String },

    #[error("Failed to write file: {path}: {reason}")]
    #[diagnostic(code(modhook::fs::write_failed))]
    FileWriteFailed { path: String, reason: String },

    #[error("Failed to restore backup of {path}: {reason}")]
    #[diagnostic(code(modhook::fs::backup_restore_failed))]
    BackupRestore { path: String, reason: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(modhook::fs::io_error))]
    IoError { message: String },

    // Configuration errors
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(modhook::config::not_found),
        help("Pass --config or place games.yaml next to the modhook binary")
    )]
    ConfigNotFound { path: String },

    #[error("Failed to parse configuration file: {path}: {reason}")]
    #[diagnostic(code(modhook::config::parse_failed))]
    ConfigParseFailed { path: String, reason: String },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(modhook::config::invalid))]
    ConfigInvalid { message: String },

    #[error("Game '{name}' is not defined")]
    #[diagnostic(
        code(modhook::config::game_not_found),
        help("Run 'modhook list' to see the configured games")
    )]
    GameNotFound { name: String },

    // Installation errors
    #[error("Managed folder not found under {path}")]
    #[diagnostic(
        code(modhook::install::managed_not_found),
        help("Select the directory that contains the game executable")
    )]
    ManagedFolderNotFound { path: String },

    #[error("Invalid game directory {path}: {reason}")]
    #[diagnostic(code(modhook::install::invalid_game_dir))]
    InvalidGameDirectory { path: String, reason: String },

    #[error("Install type '{install_type}' is not available: {reason}")]
    #[diagnostic(code(modhook::install::type_unavailable))]
    InstallTypeUnavailable {
        install_type: String,
        reason: String,
    },

    #[error("{action} is not allowed: {reason}")]
    #[diagnostic(code(modhook::install::blocked))]
    InstallBlocked { action: String, reason: String },

    #[error("{action} failed: {message}")]
    #[diagnostic(
        code(modhook::install::action_failed),
        help("All files were restored to their previous state")
    )]
    ActionFailed { action: String, message: String },
}

impl From<std::io::Error> for ModhookError {
    fn from(err: std::io::Error) -> Self {
        ModhookError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ModhookError {
    fn from(err: serde_yaml::Error) -> Self {
        ModhookError::ConfigParseFailed {
            path: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ModhookError {
    fn from(err: serde_json::Error) -> Self {
        ModhookError::ConfigParseFailed {
            path: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type alias using miette for error handling
pub type Result<T> = miette::Result<T, ModhookError>;
