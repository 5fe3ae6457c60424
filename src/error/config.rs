//! Configuration errors

use super::ModhookError;

/// Creates a config not found error
pub fn not_found(path: impl Into<String>) -> ModhookError {
    ModhookError::ConfigNotFound { path: path.into() }
}

/// Creates a config parse failed error
pub fn parse_failed(path: impl Into<String>, reason: impl Into<String>) -> ModhookError {
    ModhookError::ConfigParseFailed {
        path: path.into(),
        reason: reason.into(),
    }
}

/// Creates an invalid config error
pub fn invalid(message: impl Into<String>) -> ModhookError {
    ModhookError::ConfigInvalid {
        message: message.into(),
    }
}

/// Creates a game not found error
pub fn game_not_found(name: impl Into<String>) -> ModhookError {
    ModhookError::GameNotFound { name: name.into() }
}
