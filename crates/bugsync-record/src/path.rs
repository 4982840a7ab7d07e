//! Field paths for addressing values inside records
//!
//! Provides [`FieldPath`] for dotted addressing of nested record values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Path to a (possibly nested) value in a record
///
/// The first segment names a record field; the remaining segments walk into
/// objects by key and into lists by numeric index.
///
/// # Examples
/// - `severity` → top-level field
/// - `details.brief` → key `brief` of the object stored in `details`
/// - `comments.0.text` → `text` of the first comment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Create path from segments
    ///
    /// # Errors
    /// Returns error if there are no segments or a segment is empty
    pub fn new(segments: Vec<String>) -> Result<Self, PathError> {
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        if segments.iter().any(String::is_empty) {
            return Err(PathError::EmptySegment);
        }
        Ok(Self(segments))
    }

    /// Create path addressing a single top-level field
    #[inline]
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Get path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Name of the top-level record field this path starts at
    #[inline]
    #[must_use]
    pub fn head(&self) -> &str {
        &self.0[0]
    }

    /// Segments below the top-level field
    #[inline]
    #[must_use]
    pub fn tail(&self) -> &[String] {
        &self.0[1..]
    }

    /// Number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; paths have at least one segment
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a segment, returning new path
    #[inline]
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.0.push(segment.into());
        new
    }

    /// Walk `segments` into `value`
    ///
    /// Objects are indexed by key, arrays by a decimal index. Any other
    /// combination yields `None`.
    #[must_use]
    pub fn walk<'v>(value: &'v Value, segments: &[String]) -> Option<&'v Value> {
        segments.iter().try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Look this whole path up inside a JSON object
    #[must_use]
    pub fn lookup<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        Self::walk(value, &self.0)
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        Self::new(trimmed.split('.').map(str::to_string).collect())
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

/// Errors related to field paths
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Path has no segments
    #[error("field path is empty")]
    Empty,

    /// Empty segment in path
    #[error("field path contains empty segment")]
    EmptySegment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_from_str_valid() {
        let path: FieldPath = "details.brief".parse().unwrap();
        assert_eq!(path.segments(), &["details", "brief"]);
        assert_eq!(path.head(), "details");
        assert_eq!(path.tail(), &["brief"]);
    }

    #[test]
    fn path_from_str_empty() {
        let result: Result<FieldPath, _> = "  ".parse();
        assert_eq!(result, Err(PathError::Empty));
    }

    #[test]
    fn path_from_str_empty_segment() {
        let result: Result<FieldPath, _> = "a..b".parse();
        assert_eq!(result, Err(PathError::EmptySegment));
    }

    #[test]
    fn path_display_roundtrips() {
        let path = FieldPath::field("issue").child("primary").child("file");
        assert_eq!(path.to_string(), "issue.primary.file");
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let value = json!({"comments": [{"text": "first"}, {"text": "second"}]});
        let path: FieldPath = "comments.1.text".parse().unwrap();
        assert_eq!(path.lookup(&value), Some(&json!("second")));
    }

    #[test]
    fn lookup_missing_is_none() {
        let value = json!({"a": {"b": 1}});
        let path: FieldPath = "a.c".parse().unwrap();
        assert_eq!(path.lookup(&value), None);

        let through_scalar: FieldPath = "a.b.c".parse().unwrap();
        assert_eq!(through_scalar.lookup(&value), None);
    }
}
