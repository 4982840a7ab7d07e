//! Issue tracker boundary
//!
//! Concrete trackers (JIRA, ALM, files, fakes) implement [`IssueTracker`].
//! The reconciler only needs these operations.

use bugsync_locator::IssueLocator;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Issue fields submitted to or refreshed on a tracker, in mapping order
pub type FieldMap = IndexMap<String, Value>;

/// Coarse issue state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    /// Work remains
    Open,
    /// Resolved, closed or otherwise done
    Closed,
}

impl IssueState {
    /// State from an "is open" flag
    #[inline]
    #[must_use]
    pub fn from_open(open: bool) -> Self {
        if open {
            Self::Open
        } else {
            Self::Closed
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}

/// Target issue tracker
#[cfg_attr(test, mockall::automock)]
pub trait IssueTracker: Send + Sync {
    /// Tracker name recorded in run reports and logs
    ///
    /// Locator comments use the configured `tracker_name` instead.
    fn name(&self) -> String;

    /// Create an issue
    ///
    /// # Errors
    /// Returns [`TrackerError`] if the tracker rejects the submission.
    fn submit(&self, fields: &FieldMap) -> Result<IssueLocator, TrackerError>;

    /// Current state of an issue
    ///
    /// # Errors
    /// Returns [`TrackerError`] if the issue cannot be read.
    fn state(&self, locator: &IssueLocator) -> Result<IssueState, TrackerError>;

    /// Move an issue to `state`, leaving `comment` unless it is empty
    ///
    /// # Errors
    /// Returns [`TrackerError`] if the transition is refused.
    fn transition(
        &self,
        locator: &IssueLocator,
        state: IssueState,
        comment: &str,
    ) -> Result<(), TrackerError>;

    /// Add a comment to an issue
    ///
    /// # Errors
    /// Returns [`TrackerError`] if the comment is refused.
    fn add_comment(&self, locator: &IssueLocator, text: &str) -> Result<(), TrackerError>;

    /// Overwrite issue fields
    ///
    /// # Errors
    /// Returns [`TrackerError`] if the update is refused.
    fn update_fields(&self, locator: &IssueLocator, fields: &FieldMap) -> Result<(), TrackerError>;
}

/// Tracker-side failure, local to one group
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// Tracker refused the request (validation, workflow, permissions)
    #[error("rejected by tracker: {0}")]
    Rejected(String),

    /// Issue does not exist (deleted or moved)
    #[error("issue not found: {locator}")]
    NotFound {
        /// Rendered locator
        locator: String,
    },

    /// Credentials refused
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Transport-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation not offered by this tracker
    #[error("operation not supported: {0}")]
    Unsupported(String),
}

impl TrackerError {
    /// Create rejection error
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Create not-found error for locator
    pub fn not_found(locator: &IssueLocator) -> Self {
        Self::NotFound {
            locator: locator.to_string(),
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
