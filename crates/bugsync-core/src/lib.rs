//! bugsync core
//!
//! Groups preprocessed vulnerability records and reconciles each group with
//! an issue in a tracker.
//!
//! # Core Concepts
//!
//! - [`GroupingEngine`]: buckets records by a key expression and builds one
//!   issue field map per group from [`FieldMapping`]s
//! - [`IssueTracker`]: the six tracker operations a sync needs
//! - [`Reconciler`]: submit uncorrelated groups, transition correlated ones,
//!   write locator comments back to the source
//! - [`SyncConfig`] / [`SyncPlan`]: TOML configuration and its compiled form
//! - [`SyncReport`]: per-group outcome of a run
//!
//! # Example
//!
//! ```rust,ignore
//! use bugsync_core::{Reconciler, SyncConfig};
//!
//! let plan = SyncConfig::from_path("bugsync.toml")?.compile(fetcher)?;
//! let report = Reconciler::new(&plan, &tracker)
//!     .with_commenter(&source)
//!     .run(&source)?;
//! println!("{}", report.summary());
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

mod config;
mod error;
mod group;
mod reconcile;
mod report;
mod tracker;

pub use config::{
    CommentsConfig, GroupingConfig, PreprocessConfig, StateConfig, SyncConfig, SyncPlan,
    TransitionPolicy,
};
pub use error::{ConfigError, GroupError, MappingError, SyncError};
pub use group::{Aggregate, FieldMapping, Group, GroupSet, GroupShape, GroupingEngine};
pub use reconcile::Reconciler;
pub use report::{GroupAction, GroupOutcome, ReportSummary, SyncReport};
pub use tracker::{FieldMap, IssueState, IssueTracker, TrackerError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        IssueState, IssueTracker, Reconciler, SyncConfig, SyncError, SyncPlan, SyncReport,
        TrackerError,
    };
}
