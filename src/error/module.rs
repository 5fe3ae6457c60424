//! Assembly and entry point errors

use super::ModhookError;

/// Creates an assembly load error
pub fn load_failed(path: impl Into<String>, reason: impl Into<String>) -> ModhookError {
    ModhookError::AssemblyLoad {
        path: path.into(),
        reason: reason.into(),
    }
}

/// Creates an entry point syntax error
pub fn entry_point_invalid(spec: impl Into<String>, reason: impl Into<String>) -> ModhookError {
    ModhookError::EntryPointInvalid {
        spec: spec.into(),
        reason: reason.into(),
    }
}

/// Creates an entry point resolution error
pub fn entry_point_not_found(spec: impl Into<String>, reason: impl Into<String>) -> ModhookError {
    ModhookError::EntryPointNotFound {
        spec: spec.into(),
        reason: reason.into(),
    }
}
