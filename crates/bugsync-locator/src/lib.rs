//! bugsync issue locators
//!
//! An [`IssueLocator`] (tracker id and/or deep link) is the only state that
//! survives between runs. It lives inside a free-text comment on the source
//! vulnerability, written and read back by a [`LocatorCodec`].
//!
//! # Example
//!
//! ```rust
//! use bugsync_locator::{IssueLocator, LocatorCodec};
//!
//! let codec = LocatorCodec::builder("--- submitted to {0}: ID {1} Location {2}")
//!     .tracker_name("JIRA")
//!     .build()
//!     .unwrap();
//! let locator = IssueLocator::link("http://x/y#z").with_id("42");
//! let comment = codec.encode(&locator);
//! assert_eq!(comment, "--- submitted to JIRA: ID 42 Location http://x/y#z");
//! assert_eq!(codec.decode(&comment).unwrap(), locator);
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

mod codec;
mod error;
mod locator;

pub use codec::{LocatorCodec, LocatorCodecBuilder, Scan, DEFAULT_TEMPLATE};
pub use error::{DecodeError, TemplateError};
pub use locator::IssueLocator;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
