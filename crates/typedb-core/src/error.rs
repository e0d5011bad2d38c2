//! Error types and exit codes for typedb.
//!
//! This module provides a unified error type (`TypeDbError`) that bridges
//! domain-specific errors from the subsystems (decoder, record layer,
//! database) into a common format suitable for CLI output.
//!
//! ## Error Code Mapping
//!
//! - `2`: Invalid arguments (bad input from caller)
//! - `3`: Resolution errors (module or member not found)
//! - `6`: Corrupt database (malformed or unsupported stream)
//! - `10`: Internal errors (I/O failures, misconfiguration, bugs)
//!
//! Soft failures inside a load (a corrupt module, an unresolvable reference)
//! never reach this type. They degrade the symbol set instead; only the
//! outermost caller sees a `TypeDbError`.

use std::fmt;

use thiserror::Error;

use crate::pickle::DecodeError;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Stable error codes, used as CLI exit codes and in JSON error output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    /// Invalid arguments from caller.
    InvalidArguments = 2,
    /// Module or member not found.
    ResolutionError = 3,
    /// A database file could not be decoded.
    CorruptDatabase = 6,
    /// Internal errors (I/O, misconfiguration, unexpected state).
    InternalError = 10,
}

impl OutputErrorCode {
    /// Get the numeric code value.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for CLI output.
#[derive(Debug, Error)]
pub enum TypeDbError {
    /// Invalid arguments from caller.
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    /// No module with this name in the database or on the search paths.
    #[error("module not found: {name}")]
    ModuleNotFound { name: String },

    /// The module exists but has no such member.
    #[error("member not found: {module}.{member}")]
    MemberNotFound { module: String, member: String },

    /// A database file failed to decode.
    #[error("corrupt database file {path}: {reason}")]
    CorruptDatabase { path: String, reason: String },

    /// The database configuration is unusable.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Internal error (I/O failure or unexpected state).
    #[error("internal error: {message}")]
    InternalError { message: String },
}

// ============================================================================
// Error Code Mapping
// ============================================================================

impl From<&TypeDbError> for OutputErrorCode {
    fn from(err: &TypeDbError) -> Self {
        match err {
            TypeDbError::InvalidArguments { .. } => OutputErrorCode::InvalidArguments,
            TypeDbError::ModuleNotFound { .. } => OutputErrorCode::ResolutionError,
            TypeDbError::MemberNotFound { .. } => OutputErrorCode::ResolutionError,
            TypeDbError::CorruptDatabase { .. } => OutputErrorCode::CorruptDatabase,
            TypeDbError::Configuration { .. } => OutputErrorCode::InternalError,
            TypeDbError::InternalError { .. } => OutputErrorCode::InternalError,
        }
    }
}

impl From<TypeDbError> for OutputErrorCode {
    fn from(err: TypeDbError) -> Self {
        OutputErrorCode::from(&err)
    }
}

// ============================================================================
// Bridges
// ============================================================================

impl From<std::io::Error> for TypeDbError {
    fn from(err: std::io::Error) -> Self {
        TypeDbError::InternalError {
            message: format!("IO error: {}", err),
        }
    }
}

impl From<serde_json::Error> for TypeDbError {
    fn from(err: serde_json::Error) -> Self {
        TypeDbError::InternalError {
            message: format!("JSON error: {}", err),
        }
    }
}

impl TypeDbError {
    /// Create an invalid arguments error.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        TypeDbError::InvalidArguments {
            message: message.into(),
        }
    }

    /// Create a corrupt database error from a decode failure.
    pub fn corrupt(path: impl Into<String>, err: &DecodeError) -> Self {
        TypeDbError::CorruptDatabase {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        TypeDbError::InternalError {
            message: message.into(),
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> OutputErrorCode {
        OutputErrorCode::from(self)
    }
}

// ============================================================================
// Tests
// ============================================================================
