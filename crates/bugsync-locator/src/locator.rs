//! Issue locators

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Minimal reference to an issue in an external tracker
///
/// At least one of `id` and `deep_link` is present; empty strings count as
/// absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "LocatorParts", into = "LocatorParts")]
pub struct IssueLocator {
    id: Option<String>,
    deep_link: Option<String>,
}

impl IssueLocator {
    /// Create locator from optional parts
    ///
    /// Returns `None` if both parts are absent or empty.
    #[must_use]
    pub fn new(id: Option<String>, deep_link: Option<String>) -> Option<Self> {
        let id = id.filter(|s| !s.is_empty());
        let deep_link = deep_link.filter(|s| !s.is_empty());
        if id.is_none() && deep_link.is_none() {
            return None;
        }
        Some(Self { id, deep_link })
    }

    /// Locator known only by its deep link
    ///
    /// An empty link yields a locator that encodes to the empty field; use
    /// [`IssueLocator::new`] for untrusted input.
    #[must_use]
    pub fn link(deep_link: impl Into<String>) -> Self {
        Self {
            id: None,
            deep_link: Some(deep_link.into()),
        }
    }

    /// With tracker-side id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// Tracker-side id
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Browser link to the issue
    #[inline]
    #[must_use]
    pub fn deep_link(&self) -> Option<&str> {
        self.deep_link.as_deref()
    }
}

impl Display for IssueLocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.deep_link) {
            (Some(id), Some(link)) => write!(f, "{id} ({link})"),
            (Some(id), None) => write!(f, "{id}"),
            (None, Some(link)) => write!(f, "{link}"),
            (None, None) => write!(f, "<empty>"),
        }
    }
}

/// Serialized form of [`IssueLocator`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocatorParts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deep_link: Option<String>,
}

impl TryFrom<LocatorParts> for IssueLocator {
    type Error = String;

    fn try_from(parts: LocatorParts) -> Result<Self, Self::Error> {
        Self::new(parts.id, parts.deep_link)
            .ok_or_else(|| "issue locator needs an id or a deep link".to_string())
    }
}

impl From<IssueLocator> for LocatorParts {
    fn from(locator: IssueLocator) -> Self {
        Self {
            id: locator.id,
            deep_link: locator.deep_link,
        }
    }
}
