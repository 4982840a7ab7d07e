//! Records: ordered field maps with lazy resolution
//!
//! A [`Record`] is one source vulnerability. Fields hold either data or an
//! [`OnDemand`] placeholder; reading a placeholder field through
//! [`Record::resolve`] performs the backing fetch once and replaces the cell.

use crate::error::{FetchError, FieldError, RecordError};
use crate::field::{FieldCell, OnDemand};
use crate::path::FieldPath;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One source vulnerability
///
/// Field order is insertion order. The record also owns a resource cache
/// keyed by placeholder cache keys, so that several fields fed by the same
/// backing response cost a single fetch. A failed fetch is cached too.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: IndexMap<String, FieldCell>,
    resources: HashMap<String, Result<Value, FetchError>>,
}

impl Record {
    /// Create empty record
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build record from a JSON object
    ///
    /// # Errors
    /// Returns error if `value` is not an object
    pub fn from_json(value: Value) -> Result<Self, RecordError> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            Value::Null => Err(RecordError::NotAnObject("null")),
            Value::Bool(_) => Err(RecordError::NotAnObject("boolean")),
            Value::Number(_) => Err(RecordError::NotAnObject("number")),
            Value::String(_) => Err(RecordError::NotAnObject("string")),
            Value::Array(_) => Err(RecordError::NotAnObject("array")),
        }
    }

    /// Build record from a JSON map, keeping key order
    #[must_use]
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            fields: map
                .into_iter()
                .map(|(name, value)| (name, FieldCell::Resolved(value)))
                .collect(),
            resources: HashMap::new(),
        }
    }

    /// With resolved field (builder style)
    #[inline]
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or overwrite a resolved field
    ///
    /// Overwriting keeps the field's original position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<FieldCell> {
        self.fields
            .insert(name.into(), FieldCell::Resolved(value.into()))
    }

    /// Insert or overwrite a field with an on-demand placeholder
    pub fn insert_on_demand(&mut self, name: impl Into<String>, on_demand: OnDemand) -> Option<FieldCell> {
        self.fields
            .insert(name.into(), FieldCell::Unresolved(on_demand))
    }

    /// Remove a field
    pub fn remove(&mut self, name: &str) -> Option<FieldCell> {
        self.fields.shift_remove(name)
    }

    /// Check if field exists (in any state)
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Raw cell of a field
    #[inline]
    #[must_use]
    pub fn cell(&self, name: &str) -> Option<&FieldCell> {
        self.fields.get(name)
    }

    /// Resolved value of a field, without triggering any fetch
    #[inline]
    #[must_use]
    pub fn peek(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).and_then(FieldCell::value)
    }

    /// Check if field is present and resolved
    #[inline]
    #[must_use]
    pub fn is_resolved(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(FieldCell::is_resolved)
    }

    /// Field names in order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if record has no fields
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of cached backing responses, failures included
    #[inline]
    #[must_use]
    pub fn cached_resources(&self) -> usize {
        self.resources.len()
    }

    /// Read a field, resolving its placeholder on first access
    ///
    /// Returns `Ok(None)` for absent fields.
    ///
    /// # Errors
    /// Returns [`FieldError`] if the placeholder's fetch fails. The failure
    /// is memoized: later reads return the same error without fetching.
    pub fn resolve(&mut self, name: &str) -> Result<Option<&Value>, FieldError> {
        let pending = match self.fields.get(name) {
            None => return Ok(None),
            Some(FieldCell::Resolved(_)) => None,
            Some(FieldCell::Failed(error)) => return Err(FieldError::new(name, error.clone())),
            Some(FieldCell::Unresolved(on_demand)) => Some(on_demand.clone()),
        };

        if let Some(on_demand) = pending {
            match self.load(&on_demand) {
                Ok(value) => {
                    self.fields
                        .insert(name.to_string(), FieldCell::Resolved(value));
                }
                Err(error) => {
                    tracing::debug!(field = name, %error, "on-demand field failed");
                    self.fields
                        .insert(name.to_string(), FieldCell::Failed(error.clone()));
                    return Err(FieldError::new(name, error));
                }
            }
        }

        Ok(self.fields.get(name).and_then(FieldCell::value))
    }

    /// Read a nested value, resolving the top-level field if needed
    ///
    /// # Errors
    /// Returns [`FieldError`] if the top-level field's fetch fails.
    pub fn resolve_path(&mut self, path: &FieldPath) -> Result<Option<Value>, FieldError> {
        let Some(root) = self.resolve(path.head())? else {
            return Ok(None);
        };
        Ok(FieldPath::walk(root, path.tail()).cloned())
    }

    /// JSON view of the resolved fields
    ///
    /// Unresolved and failed placeholders are omitted; no fetch happens.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .filter_map(|(name, cell)| cell.value().map(|v| (name.clone(), v.clone())))
            .collect();
        Value::Object(map)
    }

    fn load(&mut self, on_demand: &OnDemand) -> Result<Value, FetchError> {
        let Some(key) = on_demand.cache_key() else {
            return on_demand.load().map(|response| on_demand.select_from(&response));
        };
        self.resources
            .entry(key.to_string())
            .or_insert_with(|| on_demand.load())
            .as_ref()
            .map(|response| on_demand.select_from(response))
            .map_err(Clone::clone)
    }
}

impl TryFrom<Value> for Record {
    type Error = RecordError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>, response: Value) -> OnDemand {
        let counter = Arc::clone(counter);
        OnDemand::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(response.clone())
        })
    }

    #[test]
    fn from_json_keeps_field_order() {
        let record = Record::from_json(json!({"b": 1, "a": 2, "c": 3})).unwrap();
        let names: Vec<_> = record.field_names().collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn from_json_rejects_non_objects() {
        assert_eq!(
            Record::from_json(json!([1, 2])).unwrap_err(),
            RecordError::NotAnObject("array")
        );
    }

    #[test]
    fn placeholder_fetches_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut record = Record::new().with("id", "7");
        record.insert_on_demand("details", counting(&counter, json!({"brief": "b"})));

        assert_eq!(counter.load(Ordering::SeqCst), 0, "must not resolve eagerly");
        assert!(!record.is_resolved("details"));

        for _ in 0..3 {
            let value = record.resolve("details").unwrap().cloned();
            assert_eq!(value, Some(json!({"brief": "b"})));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(record.is_resolved("details"));
    }

    #[test]
    fn shared_cache_key_fans_out_one_fetch() {
        let counter = Arc::new(AtomicUsize::new(0));
        let response = json!({"brief": "short", "detail": "long"});
        let mut record = Record::new();
        record.insert_on_demand(
            "brief",
            counting(&counter, response.clone())
                .with_cache_key("details")
                .with_select(&FieldPath::field("brief")),
        );
        record.insert_on_demand(
            "detail",
            counting(&counter, response)
                .with_cache_key("details")
                .with_select(&FieldPath::field("detail")),
        );

        assert_eq!(record.resolve("brief").unwrap(), Some(&json!("short")));
        assert_eq!(record.resolve("detail").unwrap(), Some(&json!("long")));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(record.cached_resources(), 1);
    }

    #[test]
    fn shared_cache_key_replays_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut record = Record::new();
        for name in ["brief", "detail", "severity"] {
            let inner = Arc::clone(&counter);
            record.insert_on_demand(
                name,
                OnDemand::from_fn(move || {
                    inner.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::transport("connection reset"))
                })
                .with_cache_key("details")
                .with_select(&FieldPath::field(name)),
            );
        }

        for name in ["brief", "detail", "severity"] {
            let error = record.resolve(name).unwrap_err();
            assert_eq!(error.field, name);
            assert_eq!(error.source, FetchError::transport("connection reset"));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(record.cached_resources(), 1);
    }

    #[test]
    fn failure_is_memoized_and_scoped_to_field() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&counter);
        let mut record = Record::new().with("id", "1");
        record.insert_on_demand(
            "comments",
            OnDemand::from_fn(move || {
                inner.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::transport("connection reset"))
            }),
        );

        let first = record.resolve("comments").unwrap_err();
        let second = record.resolve("comments").unwrap_err();
        assert_eq!(first, second);
        assert_eq!(first.field, "comments");
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Other fields are unaffected
        assert_eq!(record.resolve("id").unwrap(), Some(&json!("1")));
    }

    #[test]
    fn resolve_path_walks_into_resolved_value() {
        let mut record = Record::new();
        record.insert_on_demand(
            "details",
            OnDemand::from_fn(|| Ok(json!({"primary": {"file": "a.rs"}}))),
        );
        let path: FieldPath = "details.primary.file".parse().unwrap();
        assert_eq!(record.resolve_path(&path).unwrap(), Some(json!("a.rs")));

        let missing: FieldPath = "nothing.here".parse().unwrap();
        assert_eq!(record.resolve_path(&missing).unwrap(), None);
    }

    #[test]
    fn to_json_omits_unresolved() {
        let mut record = Record::new().with("id", 1);
        record.insert_on_demand("lazy", OnDemand::from_fn(|| Ok(json!("x"))));
        assert_eq!(record.to_json(), json!({"id": 1}));

        record.resolve("lazy").unwrap();
        assert_eq!(record.to_json(), json!({"id": 1, "lazy": "x"}));
    }

    #[test]
    fn overwrite_keeps_position() {
        let mut record = Record::new().with("a", 1).with("b", 2);
        record.insert("a", 3);
        let names: Vec<_> = record.field_names().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(record.peek("a"), Some(&json!(3)));
    }
}
