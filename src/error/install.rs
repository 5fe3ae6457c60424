//! Installation errors

use super::ModhookError;

/// Creates an action failed error
pub fn action_failed(action: impl Into<String>, message: impl Into<String>) -> ModhookError {
    ModhookError::ActionFailed {
        action: action.into(),
        message: message.into(),
    }
}

/// Creates a blocked action error
pub fn blocked(action: impl Into<String>, reason: impl Into<String>) -> ModhookError {
    ModhookError::InstallBlocked {
        action: action.into(),
        reason: reason.into(),
    }
}

/// Creates an unavailable install type error
pub fn type_unavailable(install_type: impl ToString, reason: impl Into<String>) -> ModhookError {
    ModhookError::InstallTypeUnavailable {
        install_type: install_type.to_string(),
        reason: reason.into(),
    }
}
