//! Stage traits
//!
//! A chain is an ordered list of [`Stage`]s. Filters decide whether a record
//! survives; enrichers rewrite it in place and never drop it.

use crate::error::StageError;
use bugsync_record::{FieldError, Record};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a filter's predicate is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Keep records that match
    #[default]
    Include,
    /// Drop records that match
    Exclude,
}

impl MatchMode {
    /// Decide whether a record with the given match result survives
    #[inline]
    #[must_use]
    pub fn keeps(self, matches: bool) -> bool {
        match self {
            Self::Include => matches,
            Self::Exclude => !matches,
        }
    }
}

/// Result of one filter on one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOutcome {
    /// Record passed the filter
    Kept,
    /// Record was removed from the stream
    Dropped,
}

impl fmt::Display for FilterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Kept => "kept",
            Self::Dropped => "dropped",
        })
    }
}

/// Record predicate
pub trait Filter: Send + Sync {
    /// Stage name used in logs and observer callbacks
    fn name(&self) -> &str;

    /// Include or exclude matching records
    fn mode(&self) -> MatchMode;

    /// Evaluate the predicate
    ///
    /// # Errors
    /// Returns [`FieldError`] if a needed field fails to load.
    fn matches(&self, record: &mut Record) -> Result<bool, FieldError>;
}

/// In-place record transformation
pub trait Enricher: Send + Sync {
    /// Stage name used in logs
    fn name(&self) -> &str;

    /// Add or replace fields of `record`
    ///
    /// # Errors
    /// Returns [`StageError`] if a needed field fails to load.
    fn enrich(&self, record: &mut Record) -> Result<(), StageError>;
}

/// One configured chain stage
pub enum Stage {
    /// Filtering stage
    Filter(Box<dyn Filter>),
    /// Enriching stage
    Enrich(Box<dyn Enricher>),
}

impl Stage {
    /// Stage name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Filter(filter) => filter.name(),
            Self::Enrich(enricher) => enricher.name(),
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter(filter) => f
                .debug_struct("Filter")
                .field("name", &filter.name())
                .field("mode", &filter.mode())
                .finish(),
            Self::Enrich(enricher) => f
                .debug_struct("Enrich")
                .field("name", &enricher.name())
                .finish(),
        }
    }
}
