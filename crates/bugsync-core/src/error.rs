//! Error types for grouping, configuration and sync runs
//!
//! Errors fall into two classes:
//! - fatal: retrieval, grouping and configuration failures abort the run
//! - group-local: mapping, field, tracker and comment failures fail one
//!   group and are recorded in the report

use crate::tracker::TrackerError;
use bugsync_locator::TemplateError;
use bugsync_pipeline::RetrieveError;
use bugsync_record::{FetchError, FieldError};
use std::path::PathBuf;

/// Grouping aborted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    /// Upstream retrieval failed
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),

    /// A group key could not be evaluated
    #[error("group key evaluation failed: {0}")]
    Key(#[source] FieldError),
}

/// Group field map could not be built
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// Required mapping produced no value
    #[error("required field '{mapping}' has no value")]
    Missing {
        /// Mapping name
        mapping: String,
    },

    /// Single-valued mapping produced differing values
    #[error("field '{mapping}' expects one value but records disagree: {values:?}")]
    Ambiguous {
        /// Mapping name
        mapping: String,
        /// Distinct rendered values
        values: Vec<String>,
    },

    /// Required mapping needed a field that failed to load
    #[error("field '{mapping}' could not be computed: {source}")]
    Field {
        /// Mapping name
        mapping: String,
        /// Underlying field failure
        #[source]
        source: FieldError,
    },
}

/// Invalid configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("cannot read configuration {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML, expression, condition or pattern
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Comment template does not compile
    #[error("invalid comment template: {0}")]
    Template(#[from] TemplateError),

    /// Semantically invalid value
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create semantic validation error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Main sync error type
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Retrieval failed; the run is aborted
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrieveError),

    /// A group key could not be evaluated; the run is aborted
    #[error("grouping failed: {0}")]
    Grouping(#[source] FieldError),

    /// Configuration is invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Group field map could not be built
    #[error("mapping failed: {0}")]
    Mapping(#[from] MappingError),

    /// Group member field failed to load (comments, open state)
    #[error("field failed: {0}")]
    Field(#[from] FieldError),

    /// Tracker refused an operation
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// Issue exists but its locator comment could not be stored
    #[error("issue {locator} submitted but its locator comment could not be stored: {source}")]
    Comment {
        /// Rendered locator of the submitted issue
        locator: String,
        /// Underlying fetch failure
        #[source]
        source: FetchError,
    },
}

impl From<GroupError> for SyncError {
    fn from(error: GroupError) -> Self {
        match error {
            GroupError::Retrieve(error) => Self::Retrieval(error),
            GroupError::Key(error) => Self::Grouping(error),
        }
    }
}

impl SyncError {
    /// Check if error aborts the whole run
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Retrieval(_) | Self::Grouping(_) | Self::Config(_))
    }

    /// Check if error only affects one group
    #[inline]
    #[must_use]
    pub fn is_group_local(&self) -> bool {
        !self.is_fatal()
    }

    /// Check if a later run could succeed without changes
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Retrieval(error) => error.is_retryable(),
            Self::Tracker(error) => error.is_retryable(),
            Self::Field(error) | Self::Grouping(error) => matches!(
                error.source,
                FetchError::Transport(_) | FetchError::Timeout { .. }
            ),
            Self::Comment { .. } => true,
            Self::Config(_) | Self::Mapping(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let fatal = SyncError::from(GroupError::Retrieve(RetrieveError::ZeroPageSize));
        assert!(fatal.is_fatal());
        assert!(matches!(fatal, SyncError::Retrieval(_)));

        let local = SyncError::from(TrackerError::Transport("reset".into()));
        assert!(local.is_group_local());
        assert!(local.is_retryable());

        let mapping = SyncError::from(MappingError::Missing { mapping: "summary".into() });
        assert!(mapping.is_group_local());
        assert!(!mapping.is_retryable());
    }

    #[test]
    fn display() {
        let err = MappingError::Ambiguous {
            mapping: "release".into(),
            values: vec!["1".into(), "2".into()],
        };
        assert_eq!(
            err.to_string(),
            "field 'release' expects one value but records disagree: [\"1\", \"2\"]"
        );
    }
}
