//! Error taxonomy for the MemoGarden core.
//!
//! Every fallible operation in the crate returns `CoreResult<T>`. The
//! variants here map 1:1 onto the machine error codes the verb dispatcher
//! and audit layer surface to callers (`code` in the wire error object).
use thiserror::Error;

/// The machine-readable error code carried in a verb response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    LockConflict,
    PermissionDenied,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::LockConflict => "lock_conflict",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

/// The main error type for MemoGarden core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Request schema failure, unknown op, invalid type, bad ops string, …
    #[error("validation error: {0}")]
    Validation(String),

    /// Target entity/fact/relation absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// `based_on_hash` / `based_on_version` mismatch on an optimistic write.
    #[error("lock conflict: {0}")]
    LockConflict(String),

    /// Reserved for an authorization collaborator to reject a request.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Any other exception.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization error when converting data to/from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Validation(_) => ErrorCode::ValidationError,
            CoreError::NotFound(_) => ErrorCode::NotFound,
            CoreError::LockConflict(_) => ErrorCode::LockConflict,
            CoreError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            CoreError::Internal(_) => ErrorCode::InternalError,
            CoreError::Serialization(_) => ErrorCode::InternalError,
        }
    }

    /// Full variant name, for audit's `error_type` field — this crate's
    /// analogue of a Python exception's fully-qualified class name.
    pub fn variant_name(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "CoreError::Validation",
            CoreError::NotFound(_) => "CoreError::NotFound",
            CoreError::LockConflict(_) => "CoreError::LockConflict",
            CoreError::PermissionDenied(_) => "CoreError::PermissionDenied",
            CoreError::Internal(_) => "CoreError::Internal",
            CoreError::Serialization(_) => "CoreError::Serialization",
        }
    }
}

/// Result type alias for MemoGarden core operations.
pub type CoreResult<T> = Result<T, CoreError>;
