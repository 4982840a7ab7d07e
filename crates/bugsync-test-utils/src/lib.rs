//! Testing utilities for bugsync workspace
//!
//! In-memory source and tracker fakes, shared fixtures.

#![allow(missing_docs)]

use bugsync_core::{FieldMap, IssueState, IssueTracker, TrackerError};
use bugsync_locator::IssueLocator;
use bugsync_pipeline::{FilterObserver, FilterOutcome, Page, SourceCommenter, SourceQuery};
use bugsync_record::{FetchError, Record, ResourceFetcher};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Vulnerability fixture with the fields most tests group and filter on
pub fn vulnerability(id: u64, application: &str, release: &str) -> Value {
    json!({
        "id": id,
        "application": application,
        "release": release,
        "category": "SQL Injection",
        "severity": 4,
        "removed": false,
        "suppressed": false,
        "comments": [],
    })
}

/// `count` vulnerabilities of one application, ids starting at 1
pub fn vulnerabilities(count: u64, application: &str) -> Vec<Value> {
    (1..=count).map(|id| vulnerability(id, application, "1.0")).collect()
}

/// In-memory vulnerability source
///
/// Records are stored as JSON and rebuilt on every fetch, so comments written
/// back through [`SourceCommenter`] are visible to the next run.
pub struct MemorySource {
    records: Mutex<Vec<Value>>,
    resources: Mutex<HashMap<String, Value>>,
    id_field: String,
    report_total: bool,
    fail_at: Option<usize>,
    page_fetches: AtomicUsize,
    resource_fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records: Mutex::new(records),
            resources: Mutex::new(HashMap::new()),
            id_field: "id".to_string(),
            report_total: true,
            fail_at: None,
            page_fetches: AtomicUsize::new(0),
            resource_fetches: AtomicUsize::new(0),
        }
    }

    /// Stop reporting a total on pages
    pub fn without_total(mut self) -> Self {
        self.report_total = false;
        self
    }

    /// Fail the page fetch at `offset`
    pub fn failing_at(mut self, offset: usize) -> Self {
        self.fail_at = Some(offset);
        self
    }

    pub fn with_resource(self, uri: impl Into<String>, value: Value) -> Self {
        self.resources.lock().insert(uri.into(), value);
        self
    }

    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    pub fn resource_fetches(&self) -> usize {
        self.resource_fetches.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop records from the end, as if the source shrank
    pub fn truncate(&self, len: usize) {
        self.records.lock().truncate(len);
    }

    /// Overwrite one field of the record with `id`
    pub fn set_field(&self, id: &Value, field: &str, value: Value) {
        let mut records = self.records.lock();
        if let Some(record) = records.iter_mut().find(|r| r.get(&self.id_field) == Some(id)) {
            record[field] = value;
        }
    }

    /// Comments of the record with `id`
    pub fn comments_of(&self, id: &Value) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .find(|r| r.get(&self.id_field) == Some(id))
            .and_then(|r| r.get("comments"))
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|c| c.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }
}

impl SourceQuery for MemorySource {
    fn fetch_page(&self, offset: usize, limit: usize) -> Result<Page, FetchError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(offset) {
            return Err(FetchError::transport(format!("page at {offset} unavailable")));
        }
        let records = self.records.lock();
        let page: Vec<Record> = records
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|value| Record::from_json(value.clone()).ok())
            .collect();
        Ok(if self.report_total {
            Page::new(page, records.len())
        } else {
            Page::without_total(page)
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

impl ResourceFetcher for MemorySource {
    fn fetch_resource(&self, uri: &str) -> Result<Value, FetchError> {
        self.resource_fetches.fetch_add(1, Ordering::SeqCst);
        self.resources
            .lock()
            .get(uri)
            .cloned()
            .ok_or_else(|| FetchError::not_found(uri))
    }
}

impl SourceCommenter for MemorySource {
    fn add_comment(&self, record: &Record, text: &str) -> Result<(), FetchError> {
        let id = record
            .peek(&self.id_field)
            .cloned()
            .ok_or_else(|| FetchError::InvalidResponse(format!("record has no {}", self.id_field)))?;
        let mut records = self.records.lock();
        let stored = records
            .iter_mut()
            .find(|r| r.get(&self.id_field) == Some(&id))
            .ok_or_else(|| FetchError::not_found(id.to_string()))?;
        match stored.get_mut("comments").and_then(Value::as_array_mut) {
            Some(comments) => comments.push(Value::String(text.to_string())),
            None => stored["comments"] = json!([text]),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryIssue {
    pub id: String,
    pub state: IssueState,
    pub fields: FieldMap,
    pub comments: Vec<String>,
}

/// In-memory issue tracker
pub struct MemoryTracker {
    name: String,
    issues: Mutex<IndexMap<String, MemoryIssue>>,
    reject: Mutex<Option<String>>,
    submissions: AtomicUsize,
    transitions: AtomicUsize,
}

impl MemoryTracker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            issues: Mutex::new(IndexMap::new()),
            reject: Mutex::new(None),
            submissions: AtomicUsize::new(0),
            transitions: AtomicUsize::new(0),
        }
    }

    /// Reject submissions whose `summary` contains `needle`
    pub fn reject_summaries_containing(&self, needle: impl Into<String>) {
        *self.reject.lock() = Some(needle.into());
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn transitions(&self) -> usize {
        self.transitions.load(Ordering::SeqCst)
    }

    pub fn issue(&self, id: &str) -> Option<MemoryIssue> {
        self.issues.lock().get(id).cloned()
    }

    pub fn issues(&self) -> Vec<MemoryIssue> {
        self.issues.lock().values().cloned().collect()
    }

    pub fn set_state(&self, id: &str, state: IssueState) {
        if let Some(issue) = self.issues.lock().get_mut(id) {
            issue.state = state;
        }
    }

    fn locator_for(id: &str) -> IssueLocator {
        IssueLocator::link(format!("memory://issues/{id}")).with_id(id)
    }

    fn with_issue<T>(
        &self,
        locator: &IssueLocator,
        f: impl FnOnce(&mut MemoryIssue) -> T,
    ) -> Result<T, TrackerError> {
        let mut issues = self.issues.lock();
        let id = locator
            .id()
            .map(String::from)
            .or_else(|| {
                locator
                    .deep_link()
                    .and_then(|link| link.rsplit('/').next())
                    .map(String::from)
            })
            .ok_or_else(|| TrackerError::not_found(locator))?;
        issues
            .get_mut(&id)
            .map(f)
            .ok_or_else(|| TrackerError::not_found(locator))
    }
}

impl IssueTracker for MemoryTracker {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn submit(&self, fields: &FieldMap) -> Result<IssueLocator, TrackerError> {
        if let Some(needle) = self.reject.lock().as_deref() {
            let summary = fields.get("summary").and_then(Value::as_str).unwrap_or_default();
            if summary.contains(needle) {
                return Err(TrackerError::rejected(format!("summary '{summary}' refused")));
            }
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let mut issues = self.issues.lock();
        let id = format!("BUG-{}", issues.len() + 1);
        issues.insert(
            id.clone(),
            MemoryIssue {
                id: id.clone(),
                state: IssueState::Open,
                fields: fields.clone(),
                comments: Vec::new(),
            },
        );
        Ok(Self::locator_for(&id))
    }

    fn state(&self, locator: &IssueLocator) -> Result<IssueState, TrackerError> {
        self.with_issue(locator, |issue| issue.state)
    }

    fn transition(
        &self,
        locator: &IssueLocator,
        state: IssueState,
        comment: &str,
    ) -> Result<(), TrackerError> {
        self.transitions.fetch_add(1, Ordering::SeqCst);
        self.with_issue(locator, |issue| {
            issue.state = state;
            if !comment.is_empty() {
                issue.comments.push(comment.to_string());
            }
        })
    }

    fn add_comment(&self, locator: &IssueLocator, text: &str) -> Result<(), TrackerError> {
        self.with_issue(locator, |issue| issue.comments.push(text.to_string()))
    }

    fn update_fields(&self, locator: &IssueLocator, fields: &FieldMap) -> Result<(), TrackerError> {
        self.with_issue(locator, |issue| {
            issue.fields.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        })
    }
}

/// Observer keeping every filter decision
#[derive(Default)]
pub struct RecordingObserver {
    decisions: Mutex<Vec<(String, Option<Value>, FilterOutcome)>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(filter, record id, outcome)` in decision order
    pub fn decisions(&self) -> Vec<(String, Option<Value>, FilterOutcome)> {
        self.decisions.lock().clone()
    }

    pub fn dropped(&self) -> usize {
        self.decisions
            .lock()
            .iter()
            .filter(|(_, _, outcome)| *outcome == FilterOutcome::Dropped)
            .count()
    }
}

impl FilterObserver for RecordingObserver {
    fn on_decision(&self, filter: &str, record: &Record, outcome: FilterOutcome) {
        self.decisions
            .lock()
            .push((filter.to_string(), record.peek("id").cloned(), outcome));
    }
}
