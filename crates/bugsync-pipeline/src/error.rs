//! Error types for the pipeline
//!
//! Both kinds are fatal to the page they occur on, which aborts retrieval.

use bugsync_record::{FetchError, FieldError};

/// A stage could not process a record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// Filter predicate needed a field that failed to load
    #[error("filter '{stage}' failed: {source}")]
    Filter {
        /// Stage name
        stage: String,
        /// Underlying field failure
        #[source]
        source: FieldError,
    },

    /// Enricher needed a field that failed to load
    #[error("enricher '{stage}' failed: {source}")]
    Enrich {
        /// Stage name
        stage: String,
        /// Underlying field failure
        #[source]
        source: FieldError,
    },
}

impl StageError {
    /// Name of the failing stage
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::Filter { stage, .. } | Self::Enrich { stage, .. } => stage,
        }
    }

    /// Underlying field failure
    #[must_use]
    pub fn field_error(&self) -> &FieldError {
        match self {
            Self::Filter { source, .. } | Self::Enrich { source, .. } => source,
        }
    }
}

/// Retrieval aborted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrieveError {
    /// Page size of zero would never advance
    #[error("page size must be greater than zero")]
    ZeroPageSize,

    /// Page fetch failed
    #[error("fetching page at offset {offset} failed: {source}")]
    Fetch {
        /// Offset of the failed page
        offset: usize,
        /// Underlying fetch failure
        #[source]
        source: FetchError,
    },

    /// Preprocessing a fetched page failed
    #[error("preprocessing page at offset {offset} failed: {source}")]
    Stage {
        /// Offset of the failed page
        offset: usize,
        /// Underlying stage failure
        #[source]
        source: StageError,
    },
}

impl RetrieveError {
    /// Offset of the page the error occurred on
    #[must_use]
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::ZeroPageSize => None,
            Self::Fetch { offset, .. } | Self::Stage { offset, .. } => Some(*offset),
        }
    }

    /// Check if a later run could succeed without configuration changes
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ZeroPageSize => false,
            Self::Fetch { source, .. } => is_transient(source),
            Self::Stage { source, .. } => is_transient(&source.field_error().source),
        }
    }
}

fn is_transient(error: &FetchError) -> bool {
    matches!(error, FetchError::Transport(_) | FetchError::Timeout { .. })
}
