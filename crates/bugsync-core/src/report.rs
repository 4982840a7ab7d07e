//! Sync run reports

use crate::error::SyncError;
use bugsync_locator::IssueLocator;
use bugsync_pipeline::RetrievalStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use ulid::Ulid;

/// What happened to one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupAction {
    /// New issue created
    Submitted {
        /// Created issue
        locator: IssueLocator,
    },
    /// Existing issue reopened
    Reopened {
        /// Correlated issue
        locator: IssueLocator,
    },
    /// Existing issue closed
    Closed {
        /// Correlated issue
        locator: IssueLocator,
    },
    /// Existing issue's fields refreshed, state unchanged
    Updated {
        /// Correlated issue
        locator: IssueLocator,
    },
    /// Existing issue already in the right state
    Unchanged {
        /// Correlated issue
        locator: IssueLocator,
    },
    /// Group could not be processed; retry on a later run
    Failed {
        /// Rendered error
        error: String,
        /// Whether a rerun alone may succeed
        retryable: bool,
    },
}

impl GroupAction {
    /// Failure from a group-local error
    #[must_use]
    pub fn failed(error: &SyncError) -> Self {
        Self::Failed {
            error: error.to_string(),
            retryable: error.is_retryable(),
        }
    }

    /// Correlated or created issue, if any
    #[must_use]
    pub fn locator(&self) -> Option<&IssueLocator> {
        match self {
            Self::Submitted { locator }
            | Self::Reopened { locator }
            | Self::Closed { locator }
            | Self::Updated { locator }
            | Self::Unchanged { locator } => Some(locator),
            Self::Failed { .. } => None,
        }
    }

    /// Check if this is a failure
    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Result of reconciling one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupOutcome {
    /// Group key
    pub key: String,
    /// Member records
    pub records: usize,
    /// Action taken
    pub action: GroupAction,
    /// Members that received the locator comment in this run
    pub annotated: usize,
    /// Locator comment still to be written by an external update step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_comment: Option<String>,
}

impl GroupOutcome {
    /// Create outcome
    #[must_use]
    pub fn new(key: impl Into<String>, records: usize, action: GroupAction) -> Self {
        Self {
            key: key.into(),
            records,
            action,
            annotated: 0,
            pending_comment: None,
        }
    }
}

/// Counts per action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    /// New issues
    pub submitted: usize,
    /// Reopened issues
    pub reopened: usize,
    /// Closed issues
    pub closed: usize,
    /// Field-only updates
    pub updated: usize,
    /// No-ops
    pub unchanged: usize,
    /// Failed groups
    pub failed: usize,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} submitted, {} reopened, {} closed, {} updated, {} unchanged, {} failed",
            self.submitted, self.reopened, self.closed, self.updated, self.unchanged, self.failed
        )
    }
}

/// Report of one sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Unique run id
    pub run_id: Ulid,
    /// Tracker name
    pub tracker: String,
    /// Source description
    pub source: String,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: Option<DateTime<Utc>>,
    /// Retrieval counters
    pub retrieval: RetrievalStats,
    /// Records skipped for an empty group key
    pub unkeyed: usize,
    /// Per-group outcomes in group order
    pub groups: Vec<GroupOutcome>,
}

impl SyncReport {
    /// Start a report
    #[must_use]
    pub fn start(tracker: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            run_id: Ulid::new(),
            tracker: tracker.into(),
            source: source.into(),
            started_at: Utc::now(),
            finished_at: None,
            retrieval: RetrievalStats::default(),
            unkeyed: 0,
            groups: Vec::new(),
        }
    }

    /// Mark the report finished
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Check if any group failed
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.groups.iter().any(|g| g.action.is_failure())
    }

    /// Failed groups
    pub fn failures(&self) -> impl Iterator<Item = &GroupOutcome> {
        self.groups.iter().filter(|g| g.action.is_failure())
    }

    /// Counts per action
    #[must_use]
    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for group in &self.groups {
            let slot = match group.action {
                GroupAction::Submitted { .. } => &mut summary.submitted,
                GroupAction::Reopened { .. } => &mut summary.reopened,
                GroupAction::Closed { .. } => &mut summary.closed,
                GroupAction::Updated { .. } => &mut summary.updated,
                GroupAction::Unchanged { .. } => &mut summary.unchanged,
                GroupAction::Failed { .. } => &mut summary.failed,
            };
            *slot += 1;
        }
        summary
    }
}
