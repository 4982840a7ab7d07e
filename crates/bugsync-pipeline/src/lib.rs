//! bugsync record pipeline
//!
//! Pulls vulnerability records page by page from a source and runs them
//! through an ordered chain of filters and enrichers.
//!
//! # Core Concepts
//!
//! - [`SourceQuery`]: paged access to a vulnerability source
//! - [`PreprocessorChain`]: ordered [`Filter`] / [`Enricher`] stages with a
//!   single [`FilterObserver`]
//! - [`PagedRetriever`]: iterator over preprocessed records, stopping at the
//!   source's latest reported total
//! - [`CommentSelector`] / [`SourceCommenter`]: reading and writing the
//!   comments that carry issue locators

#![warn(unreachable_pub)]
#![warn(missing_docs)]

mod builtin;
mod chain;
mod error;
mod observer;
mod retriever;
mod source;
mod stage;

pub use builtin::{
    ConditionFilter, LocatorEnricher, OnDemandEnricher, SetFieldEnricher, StateEnricher,
    STATE_CLOSED, STATE_OPEN,
};
pub use chain::PreprocessorChain;
pub use error::{RetrieveError, StageError};
pub use observer::{FilterObserver, NoopObserver, TracingObserver};
pub use retriever::{PagedRetriever, RetrievalStats, DEFAULT_PAGE_SIZE};
pub use source::{CommentSelector, Page, SourceCommenter, SourceQuery};
pub use stage::{Enricher, Filter, FilterOutcome, MatchMode, Stage};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
