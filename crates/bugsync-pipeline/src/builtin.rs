//! Built-in stages

use crate::error::StageError;
use crate::source::CommentSelector;
use crate::stage::{Enricher, Filter, MatchMode};
use bugsync_locator::LocatorCodec;
use bugsync_record::{
    Condition, Expression, FieldError, FieldPath, OnDemand, Record, ResourceFetcher,
};
use std::sync::Arc;

/// Value of [`StateEnricher`] fields for open vulnerabilities
pub const STATE_OPEN: &str = "Open";
/// Value of [`StateEnricher`] fields for closed vulnerabilities
pub const STATE_CLOSED: &str = "Closed";

/// Filter driven by a [`Condition`]
#[derive(Debug, Clone)]
pub struct ConditionFilter {
    name: String,
    condition: Condition,
    mode: MatchMode,
}

impl ConditionFilter {
    /// Create filter
    #[must_use]
    pub fn new(name: impl Into<String>, condition: Condition, mode: MatchMode) -> Self {
        Self {
            name: name.into(),
            condition,
            mode,
        }
    }
}

impl Filter for ConditionFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> MatchMode {
        self.mode
    }

    fn matches(&self, record: &mut Record) -> Result<bool, FieldError> {
        self.condition.evaluate(record)
    }
}

/// Sets a field from an expression
///
/// An expression evaluating to nothing removes the field.
#[derive(Debug, Clone)]
pub struct SetFieldEnricher {
    field: String,
    value: Expression,
}

impl SetFieldEnricher {
    /// Create enricher
    #[must_use]
    pub fn new(field: impl Into<String>, value: Expression) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

impl Enricher for SetFieldEnricher {
    fn name(&self) -> &str {
        &self.field
    }

    fn enrich(&self, record: &mut Record) -> Result<(), StageError> {
        let value = self.value.evaluate(record).map_err(|source| StageError::Enrich {
            stage: self.field.clone(),
            source,
        })?;
        match value {
            Some(value) => {
                record.insert(self.field.clone(), value);
            }
            None => {
                record.remove(&self.field);
            }
        }
        Ok(())
    }
}

/// Installs an on-demand placeholder loading a per-record resource
///
/// Nothing is fetched here; the fetch happens when something first reads
/// the field.
#[derive(Clone)]
pub struct OnDemandEnricher {
    field: String,
    uri: Expression,
    fetcher: Arc<dyn ResourceFetcher>,
    select: Option<FieldPath>,
    cacheable: bool,
}

impl OnDemandEnricher {
    /// Create enricher installing `field` from the resource at `uri`
    #[must_use]
    pub fn new(field: impl Into<String>, uri: Expression, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self {
            field: field.into(),
            uri,
            fetcher,
            select: None,
            cacheable: false,
        }
    }

    /// Select a part of the fetched resource
    #[must_use]
    pub fn with_select(mut self, path: FieldPath) -> Self {
        self.select = Some(path);
        self
    }

    /// Share the fetched resource with sibling fields using the same uri
    #[must_use]
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }
}

impl Enricher for OnDemandEnricher {
    fn name(&self) -> &str {
        &self.field
    }

    fn enrich(&self, record: &mut Record) -> Result<(), StageError> {
        let uri = self
            .uri
            .evaluate_text(record, &bugsync_record::Scope::new())
            .map_err(|source| StageError::Enrich {
                stage: self.field.clone(),
                source,
            })?;
        let Some(uri) = uri.filter(|u| !u.is_empty()) else {
            tracing::debug!(field = %self.field, "no resource uri for record; field left unset");
            return Ok(());
        };
        let mut on_demand = OnDemand::for_uri(Arc::clone(&self.fetcher), uri, self.cacheable);
        if let Some(path) = &self.select {
            on_demand = on_demand.with_select(path);
        }
        record.insert_on_demand(self.field.clone(), on_demand);
        Ok(())
    }
}

impl std::fmt::Debug for OnDemandEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDemandEnricher")
            .field("field", &self.field)
            .field("uri", &self.uri)
            .field("select", &self.select)
            .field("cacheable", &self.cacheable)
            .finish_non_exhaustive()
    }
}

/// Sets a field to [`STATE_OPEN`] or [`STATE_CLOSED`]
#[derive(Debug, Clone)]
pub struct StateEnricher {
    field: String,
    open: Condition,
}

impl StateEnricher {
    /// Create enricher
    #[must_use]
    pub fn new(field: impl Into<String>, open: Condition) -> Self {
        Self {
            field: field.into(),
            open,
        }
    }
}

impl Enricher for StateEnricher {
    fn name(&self) -> &str {
        &self.field
    }

    fn enrich(&self, record: &mut Record) -> Result<(), StageError> {
        let open = self.open.evaluate(record).map_err(|source| StageError::Enrich {
            stage: self.field.clone(),
            source,
        })?;
        record.insert(self.field.clone(), if open { STATE_OPEN } else { STATE_CLOSED });
        Ok(())
    }
}

/// Copies the latest locator found in a record's comments into fields
///
/// Lets keys and mappings refer to an already submitted issue, e.g. to group
/// by existing issue link.
#[derive(Debug, Clone)]
pub struct LocatorEnricher {
    codec: Arc<LocatorCodec>,
    comments: CommentSelector,
    id_field: String,
    link_field: String,
}

impl LocatorEnricher {
    /// Create enricher writing `id_field` and `link_field`
    #[must_use]
    pub fn new(
        codec: Arc<LocatorCodec>,
        comments: CommentSelector,
        id_field: impl Into<String>,
        link_field: impl Into<String>,
    ) -> Self {
        Self {
            codec,
            comments,
            id_field: id_field.into(),
            link_field: link_field.into(),
        }
    }
}

impl Enricher for LocatorEnricher {
    fn name(&self) -> &str {
        &self.link_field
    }

    fn enrich(&self, record: &mut Record) -> Result<(), StageError> {
        let comments = self.comments.comments(record).map_err(|source| StageError::Enrich {
            stage: self.link_field.clone(),
            source,
        })?;
        let Some(locator) = self.codec.scan(&comments).locator else {
            return Ok(());
        };
        if let Some(id) = locator.id() {
            record.insert(self.id_field.clone(), id);
        }
        if let Some(link) = locator.deep_link() {
            record.insert(self.link_field.clone(), link);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugsync_locator::IssueLocator;
    use bugsync_record::FetchError;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFetcher(AtomicUsize);

    impl ResourceFetcher for CountingFetcher {
        fn fetch_resource(&self, uri: &str) -> Result<Value, FetchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"uri": uri, "brief": "summary", "detail": "long text"}))
        }
    }

    #[test]
    fn set_field_overwrites_and_removes() {
        let mut record = Record::new().with("a", 1).with("b", 2);
        SetFieldEnricher::new("a", Expression::parse("${b}").unwrap())
            .enrich(&mut record)
            .unwrap();
        assert_eq!(record.peek("a"), Some(&json!(2)));

        SetFieldEnricher::new("b", Expression::parse("${missing}").unwrap())
            .enrich(&mut record)
            .unwrap();
        assert!(!record.contains("b"));
    }

    #[test]
    fn on_demand_enricher_is_lazy_and_shares_cache() {
        let fetcher = Arc::new(CountingFetcher::default());
        let uri = Expression::parse("/issues/${id}/details").unwrap();
        let brief = OnDemandEnricher::new("brief", uri.clone(), fetcher.clone())
            .with_select(FieldPath::field("brief"))
            .cacheable(true);
        let detail = OnDemandEnricher::new("detail", uri, fetcher.clone())
            .with_select(FieldPath::field("detail"))
            .cacheable(true);

        let mut record = Record::new().with("id", 9);
        brief.enrich(&mut record).unwrap();
        detail.enrich(&mut record).unwrap();
        assert_eq!(fetcher.0.load(Ordering::SeqCst), 0);

        assert_eq!(record.resolve("brief").unwrap(), Some(&json!("summary")));
        assert_eq!(record.resolve("detail").unwrap(), Some(&json!("long text")));
        assert_eq!(fetcher.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn state_enricher_writes_open_or_closed() {
        let open = Condition::IsTrue(Expression::parse("${removed}").unwrap()).negate();
        let enricher = StateEnricher::new("state", open);

        let mut live = Record::new().with("removed", false);
        enricher.enrich(&mut live).unwrap();
        assert_eq!(live.peek("state"), Some(&json!(STATE_OPEN)));

        let mut gone = Record::new().with("removed", true);
        enricher.enrich(&mut gone).unwrap();
        assert_eq!(gone.peek("state"), Some(&json!(STATE_CLOSED)));
    }

    #[test]
    fn locator_enricher_copies_latest_locator() {
        let codec = Arc::new(LocatorCodec::builder(bugsync_locator::DEFAULT_TEMPLATE)
            .tracker_name("JIRA")
            .build()
            .unwrap());
        let comment = codec.encode(&IssueLocator::link("http://j/P-1").with_id("P-1"));
        let enricher = LocatorEnricher::new(
            codec,
            CommentSelector::default(),
            "bug_id",
            "bug_link",
        );

        let mut record = Record::new().with("comments", json!(["triaged", comment]));
        enricher.enrich(&mut record).unwrap();
        assert_eq!(record.peek("bug_id"), Some(&json!("P-1")));
        assert_eq!(record.peek("bug_link"), Some(&json!("http://j/P-1")));

        let mut fresh = Record::new().with("comments", json!(["triaged"]));
        enricher.enrich(&mut fresh).unwrap();
        assert!(!fresh.contains("bug_link"));
    }

    #[test]
    fn condition_filter_reports_mode() {
        let filter = ConditionFilter::new("all", Condition::Always, MatchMode::Exclude);
        assert_eq!(filter.mode(), MatchMode::Exclude);
        assert!(filter.matches(&mut Record::new()).unwrap());
    }
}
