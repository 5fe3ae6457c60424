//! File system errors

use super::ModhookError;

/// Creates a file not found error
pub fn not_found(path: impl Into<String>) -> ModhookError {
    ModhookError::FileNotFound { path: path.into() }
}

/// Creates a file read failed error
pub fn read_failed(path: impl Into<String>, reason: impl Into<String>) -> ModhookError {
    ModhookError::FileReadFailed {
        path: path.into(),
        reason: reason.into(),
    }
}

/// Creates a file write failed error
pub fn write_failed(path: impl Into<String>, reason: impl Into<String>) -> ModhookError {
    ModhookError::FileWriteFailed {
        path: path.into(),
        reason: reason.into(),
    }
}

/// Creates an access denied error
pub fn access_denied(path: impl Into<String>) -> ModhookError {
    ModhookError::FileAccess { path: path.into() }
}

/// Creates a backup restore error
pub fn restore_failed(path: impl Into<String>, reason: impl Into<String>) -> ModhookError {
    ModhookError::BackupRestore {
        path: path.into(),
        reason: reason.into(),
    }
}
