//! Error types for locator templates and decoding

/// Invalid comment template
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// Placeholder name not recognised
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),

    /// `id` or `deepLink` used more than once
    #[error("placeholder '{{{0}}}' used more than once")]
    DuplicatePlaceholder(String),

    /// Neither `id` nor `deepLink` present
    #[error("template must contain an {{id}} or {{deepLink}} placeholder")]
    NoLocatorField,

    /// Two placeholders with no literal text between them
    #[error("placeholders '{{{0}}}' and '{{{1}}}' must be separated by literal text")]
    AdjacentPlaceholders(String, String),

    /// `{` without closing `}`
    #[error("unterminated placeholder at byte {0}")]
    UnterminatedPlaceholder(usize),

    /// `[[` without closing `]]`
    #[error("unterminated optional section at byte {0}")]
    UnterminatedSection(usize),

    /// `[[` inside an optional section
    #[error("nested optional section at byte {0}")]
    NestedSection(usize),

    /// `{tracker}` used but no tracker name configured
    #[error("template uses {{tracker}} but no tracker name was given")]
    MissingTrackerName,

    /// Derived pattern failed to compile
    #[error("derived pattern is invalid: {0}")]
    Pattern(String),
}

/// Failure to read a locator back from a comment
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Comment was not written by this codec
    #[error("comment does not match the locator template")]
    NoMatch,

    /// Comment looks like ours but its fields cannot be recovered
    #[error("malformed locator comment '{comment}': {reason}")]
    Malformed {
        /// Offending comment
        comment: String,
        /// What went wrong
        reason: String,
    },
}

impl DecodeError {
    /// Create malformed error
    pub fn malformed(comment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            comment: comment.into(),
            reason: reason.into(),
        }
    }

    /// Check if the comment was recognised as a locator comment
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}
