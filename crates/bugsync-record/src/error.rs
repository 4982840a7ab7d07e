//! Error types for records
//!
//! Provides error handling for:
//! - Remote fetches behind on-demand fields
//! - Field resolution scoped to one field
//! - Expression and condition parsing

use crate::path::PathError;

/// Failure of a remote fetch (page or single resource)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Transport-level failure (connection, TLS, I/O)
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend rejected the credentials
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Requested resource does not exist
    #[error("resource not found: {uri}")]
    NotFound {
        /// Requested uri
        uri: String,
    },

    /// Backend transport timed out
    #[error("request timed out after {secs}s")]
    Timeout {
        /// Elapsed seconds
        secs: u64,
    },

    /// Response could not be interpreted
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Operation is not offered by this backend
    #[error("operation not supported: {0}")]
    Unsupported(String),
}

impl FetchError {
    /// Create transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create not-found error for uri
    pub fn not_found(uri: impl Into<String>) -> Self {
        Self::NotFound { uri: uri.into() }
    }
}

/// Resolution failure scoped to a single record field
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field '{field}' could not be resolved: {source}")]
pub struct FieldError {
    /// Field whose placeholder failed
    pub field: String,
    /// Underlying fetch failure
    #[source]
    pub source: FetchError,
}

impl FieldError {
    /// Create field error
    pub fn new(field: impl Into<String>, source: FetchError) -> Self {
        Self {
            field: field.into(),
            source,
        }
    }
}

/// Errors while building records from raw data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Raw value was not a JSON object
    #[error("record must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Errors while parsing expressions and conditions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    /// `${` without closing `}`
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),

    /// Placeholder contained an invalid path
    #[error("invalid placeholder '{placeholder}': {source}")]
    InvalidPath {
        /// Placeholder text without `${` and `}`
        placeholder: String,
        /// Path parse failure
        #[source]
        source: PathError,
    },

    /// Scope variable name is empty
    #[error("empty variable name in placeholder at byte {0}")]
    EmptyVariable(usize),

    /// Regular expression failed to compile
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Pattern as written
        pattern: String,
        /// Compiler message
        message: String,
    },
}
