//! Source-side collaborator traits
//!
//! Concrete backends (REST clients, files, fakes) implement these; the
//! pipeline only pulls pages and, after submission, writes comments back.

use bugsync_record::{display_value, Expression, FetchError, FieldError, FieldPath, Record};
use serde_json::Value;

/// One fetched page
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Records on this page, in source order
    pub records: Vec<Record>,
    /// Total number of records the source currently reports, if known
    pub total: Option<usize>,
}

impl Page {
    /// Create page with a reported total
    #[inline]
    #[must_use]
    pub fn new(records: Vec<Record>, total: usize) -> Self {
        Self {
            records,
            total: Some(total),
        }
    }

    /// Create page from a source that does not report totals
    #[inline]
    #[must_use]
    pub fn without_total(records: Vec<Record>) -> Self {
        Self {
            records,
            total: None,
        }
    }
}

/// Paged query against a vulnerability source
pub trait SourceQuery: Send + Sync {
    /// Fetch up to `limit` records starting at `offset`
    ///
    /// # Errors
    /// Returns [`FetchError`] on transport or backend failure.
    fn fetch_page(&self, offset: usize, limit: usize) -> Result<Page, FetchError>;

    /// Total record count reported by the source
    ///
    /// The default reads the total from a one-record page.
    ///
    /// # Errors
    /// Returns [`FetchError`] on transport or backend failure.
    fn total_count(&self) -> Result<Option<usize>, FetchError> {
        Ok(self.fetch_page(0, 1)?.total)
    }

    /// Human-readable description for logs
    fn describe(&self) -> String {
        "source".to_string()
    }
}

/// Writes comments onto source records
pub trait SourceCommenter: Send + Sync {
    /// Append `text` to the comments of `record`
    ///
    /// # Errors
    /// Returns [`FetchError`] on transport or backend failure.
    fn add_comment(&self, record: &Record, text: &str) -> Result<(), FetchError>;
}

/// Where a record keeps its comments
///
/// `source` evaluates to a list (or a single value); `text`, if set, picks
/// the comment text out of each list element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentSelector {
    source: Expression,
    text: Option<FieldPath>,
}

impl CommentSelector {
    /// Create selector reading comments from `source`
    #[must_use]
    pub fn new(source: Expression) -> Self {
        Self { source, text: None }
    }

    /// With path to the text inside each comment element
    #[must_use]
    pub fn with_text_path(mut self, path: FieldPath) -> Self {
        self.text = Some(path);
        self
    }

    /// Comment texts of a record, oldest first
    ///
    /// # Errors
    /// Returns [`FieldError`] if the comments field fails to load.
    pub fn comments(&self, record: &mut Record) -> Result<Vec<String>, FieldError> {
        let Some(value) = self.source.evaluate(record)? else {
            return Ok(Vec::new());
        };
        let items = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        Ok(items
            .iter()
            .filter_map(|item| match &self.text {
                Some(path) => FieldPath::walk(item, path.segments()),
                None => Some(item),
            })
            .filter(|value| !value.is_null())
            .map(display_value)
            .collect())
    }
}

impl Default for CommentSelector {
    fn default() -> Self {
        Self::new(Expression::field(FieldPath::field("comments")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugsync_record::OnDemand;
    use parking_lot::Mutex;
    use serde_json::json;

    struct OnePage {
        total: Option<usize>,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl SourceQuery for OnePage {
        fn fetch_page(&self, offset: usize, limit: usize) -> Result<Page, FetchError> {
            self.calls.lock().push((offset, limit));
            let records = vec![Record::new().with("id", 1)];
            Ok(match self.total {
                Some(total) => Page::new(records, total),
                None => Page::without_total(records),
            })
        }
    }

    #[test]
    fn total_count_reads_one_record_page() {
        let source = OnePage {
            total: Some(130),
            calls: Mutex::new(Vec::new()),
        };
        assert_eq!(source.total_count().unwrap(), Some(130));
        assert_eq!(*source.calls.lock(), vec![(0, 1)]);

        let silent = OnePage {
            total: None,
            calls: Mutex::new(Vec::new()),
        };
        assert_eq!(silent.total_count().unwrap(), None);
    }

    #[test]
    fn default_selector_reads_comments_field() {
        let mut record = Record::new().with("comments", json!(["first", "second"]));
        assert_eq!(
            CommentSelector::default().comments(&mut record).unwrap(),
            vec!["first", "second"]
        );
    }

    #[test]
    fn text_path_picks_from_objects() {
        let mut record = Record::new();
        record.insert_on_demand(
            "history",
            OnDemand::from_fn(|| Ok(json!([{"comment": "a"}, {"other": 1}, {"comment": "b"}]))),
        );
        let selector = CommentSelector::new(Expression::parse("${history}").unwrap())
            .with_text_path(FieldPath::field("comment"));
        assert_eq!(selector.comments(&mut record).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn missing_comments_are_empty() {
        let mut record = Record::new();
        assert!(CommentSelector::default().comments(&mut record).unwrap().is_empty());
    }

    #[test]
    fn single_value_is_one_comment() {
        let mut record = Record::new().with("comments", "only");
        assert_eq!(CommentSelector::default().comments(&mut record).unwrap(), vec!["only"]);
    }
}
