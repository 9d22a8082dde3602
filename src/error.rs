//! Application error types
//!
//! One taxonomy for the whole storage core. `code()` is the stable,
//! machine-readable contract; the Display strings are the user-facing
//! layer and may be localized independently.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the secure note storage core
#[derive(Debug, Error)]
pub enum AppError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid password")]
    BadPassword,

    #[error("Too many failed attempts; locked for {0:?}")]
    LockedOut(Duration),

    #[error("Biometric authentication failed: {0}")]
    BiometricFailed(String),

    #[error("Data integrity check failed: {0}")]
    IntegrityError(String),

    #[error("Cryptographic operation failed: {0}")]
    CryptoFailure(String),

    #[error("Save failed: {0}")]
    SaveFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable error code used across the API boundary.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "FILE_NOT_FOUND",
            AppError::PermissionDenied(_) => "PERMISSION_DENIED",
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::BadPassword => "INVALID_PASSWORD",
            AppError::LockedOut(_) => "LOCKED_OUT",
            AppError::BiometricFailed(_) => "BIOMETRIC_FAILED",
            AppError::IntegrityError(_) => "INTEGRITY_ERROR",
            AppError::CryptoFailure(_) => "ENCRYPTION_FAILED",
            AppError::SaveFailed(_) => "SAVE_FAILED",
            AppError::Io(_) => "SAVE_FAILED",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    /// True for failures that should suspend auto-save for a note rather
    /// than be retried on the next tick.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AppError::BadPassword | AppError::LockedOut(_) | AppError::BiometricFailed(_)
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("invalid JSON: {err}"))
    }
}

impl From<base64::DecodeError> for AppError {
    fn from(err: base64::DecodeError) -> Self {
        AppError::Validation(format!("invalid base64: {err}"))
    }
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, AppError>;
