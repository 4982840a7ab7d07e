//! bugsync records
//!
//! Source vulnerabilities as ordered field maps with lazily resolved fields.
//!
//! # Core Concepts
//!
//! - [`Record`]: ordered field map; fields are data or [`OnDemand`] placeholders
//! - [`OnDemand`]: deferred fetch, run on first read only, optionally sharing
//!   one backing response between sibling fields via a cache key
//! - [`FieldPath`]: dotted addressing into nested values
//! - [`Expression`]: templated value read from a record (and scope variables)
//! - [`Condition`]: predicate tree over expressions
//!
//! # Example
//!
//! ```rust,ignore
//! use bugsync_record::{Expression, OnDemand, Record};
//!
//! let mut record = Record::new().with("id", "7");
//! record.insert_on_demand("details", OnDemand::for_uri(fetcher, "/issues/7", true));
//!
//! // Nothing fetched yet; this read triggers exactly one fetch
//! let brief = Expression::parse("${details.brief}")?.evaluate(&mut record)?;
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

mod condition;
mod error;
mod expr;
mod field;
mod path;
mod record;

pub use condition::{is_truthy, values_equal, Condition, ConditionSpec};
pub use error::{ExpressionError, FetchError, FieldError, RecordError};
pub use expr::{display_value, Expression, Scope, Segment};
pub use field::{FieldCell, FieldLoader, OnDemand, ResourceFetcher, UriLoader};
pub use path::{FieldPath, PathError};
pub use record::Record;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Condition, Expression, FetchError, FieldError, FieldPath, OnDemand, Record,
        ResourceFetcher, Scope,
    };
}
