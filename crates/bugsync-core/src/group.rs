//! Grouping engine
//!
//! Records sharing a key become one [`Group`], i.e. one tracker issue. Keys
//! come from an [`Expression`]; groups keep first-seen key order. Once all
//! records are in, every group's field map is computed from the configured
//! [`FieldMapping`]s with these scope variables:
//!
//! | Variable | Value |
//! |---|---|
//! | `@key` | group key |
//! | `@size` | number of records in the group |
//! | `@grouped` | whether the group is shaped [`GroupShape::Grouped`] |

use crate::error::{GroupError, MappingError};
use crate::tracker::FieldMap;
use bugsync_pipeline::RetrieveError;
use bugsync_record::{display_value, Expression, FieldError, Record, Scope};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How one mapping combines the values of a group's records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    /// First present value in record order
    #[default]
    First,
    /// The one value all records agree on; disagreement is an error
    Single,
    /// Present values rendered as text and joined by the separator
    Join,
    /// Unique present values as a list, in first-seen order
    Distinct,
    /// Number of records with a present value
    Count,
}

fn default_separator() -> String {
    ", ".to_string()
}

/// One issue field computed from a group
#[derive(Debug, Clone, Deserialize)]
pub struct FieldMapping {
    /// Issue field name
    pub name: String,
    /// Per-record value
    pub value: Expression,
    /// Combination across records
    #[serde(default)]
    pub aggregate: Aggregate,
    /// Separator for [`Aggregate::Join`]
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Fail the group instead of omitting the field when no value results
    #[serde(default)]
    pub required: bool,
}

impl FieldMapping {
    /// Create optional mapping taking the first value
    #[must_use]
    pub fn new(name: impl Into<String>, value: Expression) -> Self {
        Self {
            name: name.into(),
            value,
            aggregate: Aggregate::First,
            separator: default_separator(),
            required: false,
        }
    }

    /// With aggregate
    #[inline]
    #[must_use]
    pub fn with_aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = aggregate;
        self
    }

    /// With join separator
    #[inline]
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Mark as required
    #[inline]
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Compute this mapping over a group's records
    ///
    /// # Errors
    /// - [`MappingError::Missing`] if required and no value results
    /// - [`MappingError::Ambiguous`] if [`Aggregate::Single`] sees differing values
    /// - [`MappingError::Field`] if required and a field fails to load
    pub fn evaluate(&self, records: &mut [Record], scope: &Scope) -> Result<Option<Value>, MappingError> {
        let value = match self.aggregate_values(records, scope) {
            Ok(Aggregated::Value(value)) => value,
            Ok(Aggregated::Conflict(values)) => {
                return Err(MappingError::Ambiguous {
                    mapping: self.name.clone(),
                    values: values.iter().map(display_value).collect(),
                })
            }
            Err(source) if self.required => {
                return Err(MappingError::Field {
                    mapping: self.name.clone(),
                    source,
                })
            }
            Err(error) => {
                tracing::warn!(mapping = %self.name, %error, "optional field omitted");
                None
            }
        };
        match value {
            None if self.required => Err(MappingError::Missing {
                mapping: self.name.clone(),
            }),
            other => Ok(other),
        }
    }

    fn aggregate_values(&self, records: &mut [Record], scope: &Scope) -> Result<Aggregated, FieldError> {
        let mut values = Vec::new();
        for record in records.iter_mut() {
            if let Some(value) = self.value.evaluate_in(record, scope)? {
                values.push(value);
                if self.aggregate == Aggregate::First {
                    break;
                }
            }
        }

        let value = match self.aggregate {
            Aggregate::First => values.into_iter().next(),
            Aggregate::Count => Some(Value::from(values.len())),
            Aggregate::Join => {
                let parts: Vec<String> = values
                    .iter()
                    .map(display_value)
                    .filter(|s| !s.is_empty())
                    .collect();
                (!parts.is_empty()).then(|| Value::String(parts.join(&self.separator)))
            }
            Aggregate::Distinct | Aggregate::Single => {
                let mut unique: Vec<Value> = Vec::new();
                for value in values {
                    if !unique.contains(&value) {
                        unique.push(value);
                    }
                }
                match unique.len() {
                    0 => None,
                    1 if self.aggregate == Aggregate::Single => unique.pop(),
                    _ if self.aggregate == Aggregate::Single => {
                        return Ok(Aggregated::Conflict(unique));
                    }
                    _ => Some(Value::Array(unique)),
                }
            }
        };
        Ok(Aggregated::Value(value))
    }
}

enum Aggregated {
    Value(Option<Value>),
    Conflict(Vec<Value>),
}

/// Whether a group is treated as a multi-record issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupShape {
    /// Issue for a set of records
    Grouped,
    /// Issue for exactly one record
    Single,
}

/// Records forming one issue, with the issue's field map
///
/// A failed field mapping is kept on the group so that the failure can be
/// reported against its key and size.
#[derive(Debug, Clone)]
pub struct Group {
    key: String,
    records: Vec<Record>,
    fields: Result<FieldMap, MappingError>,
    shape: GroupShape,
}

impl Group {
    /// Group key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Member records in first-seen order
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Member records, mutable for lazy field resolution
    #[inline]
    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    /// Computed issue fields
    ///
    /// # Errors
    /// Returns the [`MappingError`] that prevented the field map from being
    /// built.
    #[inline]
    pub fn fields(&self) -> Result<&FieldMap, &MappingError> {
        self.fields.as_ref()
    }

    /// Group shape
    #[inline]
    #[must_use]
    pub fn shape(&self) -> GroupShape {
        self.shape
    }

    /// Number of member records (never zero)
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false; groups have at least one record
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of grouping one retrieval
#[derive(Debug, Default)]
pub struct GroupSet {
    groups: IndexMap<String, Group>,
    records: usize,
    unkeyed: usize,
}

impl GroupSet {
    /// Number of groups, including those whose mapping failed
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Check if there are no groups
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Records consumed, including unkeyed ones
    #[inline]
    #[must_use]
    pub fn records(&self) -> usize {
        self.records
    }

    /// Records skipped because their key was empty
    #[inline]
    #[must_use]
    pub fn unkeyed(&self) -> usize {
        self.unkeyed
    }

    /// Group keys in first-seen order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Group by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Group> {
        self.groups.get(key)
    }

    /// Iterate groups in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Group)> {
        self.groups.iter().map(|(k, g)| (k.as_str(), g))
    }
}

impl IntoIterator for GroupSet {
    type Item = (String, Group);
    type IntoIter = indexmap::map::IntoIter<String, Group>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

/// Partitions records into groups and maps group fields
#[derive(Debug, Clone)]
pub struct GroupingEngine {
    key: Expression,
    force_grouping: bool,
    mappings: Vec<FieldMapping>,
}

impl GroupingEngine {
    /// Create engine keyed by `key`
    #[must_use]
    pub fn new(key: Expression) -> Self {
        Self {
            key,
            force_grouping: false,
            mappings: Vec::new(),
        }
    }

    /// Keep single-record groups shaped [`GroupShape::Grouped`]
    #[inline]
    #[must_use]
    pub fn with_force_grouping(mut self, force: bool) -> Self {
        self.force_grouping = force;
        self
    }

    /// With field mapping appended
    #[inline]
    #[must_use]
    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// Configured mappings
    #[inline]
    #[must_use]
    pub fn mappings(&self) -> &[FieldMapping] {
        &self.mappings
    }

    /// Key of one record; `None` if it renders empty
    ///
    /// # Errors
    /// Returns [`FieldError`] if a field used by the key fails to load.
    pub fn group_key(&self, record: &mut Record) -> Result<Option<String>, FieldError> {
        Ok(self
            .key
            .evaluate_text(record, &Scope::new())?
            .filter(|key| !key.trim().is_empty()))
    }

    /// Group a retrieval stream
    ///
    /// # Errors
    /// Returns [`GroupError`] if retrieval fails or a key cannot be
    /// evaluated. Mapping failures stay on their [`Group`].
    pub fn group<I>(&self, stream: I) -> Result<GroupSet, GroupError>
    where
        I: IntoIterator<Item = Result<Record, RetrieveError>>,
    {
        let mut buckets: IndexMap<String, Vec<Record>> = IndexMap::new();
        let mut set = GroupSet::default();

        for record in stream {
            let mut record = record?;
            set.records += 1;
            match self.group_key(&mut record).map_err(GroupError::Key)? {
                Some(key) => buckets.entry(key).or_default().push(record),
                None => {
                    set.unkeyed += 1;
                    tracing::warn!(record = %record.to_json(), "record has empty group key; skipped");
                }
            }
        }

        for (key, records) in buckets {
            let group = self.build(key.clone(), records);
            if let Err(error) = group.fields() {
                tracing::error!(key = %key, %error, "group field mapping failed");
            }
            set.groups.insert(key, group);
        }

        tracing::info!(
            groups = set.len(),
            records = set.records,
            unkeyed = set.unkeyed,
            "records grouped"
        );
        Ok(set)
    }

    /// Group already retrieved records
    ///
    /// # Errors
    /// Returns [`GroupError::Key`] if a key cannot be evaluated.
    pub fn group_records<I>(&self, records: I) -> Result<GroupSet, GroupError>
    where
        I: IntoIterator<Item = Record>,
    {
        self.group(records.into_iter().map(Ok))
    }

    fn build(&self, key: String, mut records: Vec<Record>) -> Group {
        let shape = if records.len() == 1 && !self.force_grouping {
            GroupShape::Single
        } else {
            GroupShape::Grouped
        };

        let mut scope = Scope::new();
        scope.insert("key".to_string(), Value::String(key.clone()));
        scope.insert("size".to_string(), Value::from(records.len()));
        scope.insert("grouped".to_string(), Value::Bool(shape == GroupShape::Grouped));

        let fields = self.map_fields(&mut records, &scope);
        Group {
            key,
            records,
            fields,
            shape,
        }
    }

    fn map_fields(&self, records: &mut [Record], scope: &Scope) -> Result<FieldMap, MappingError> {
        let mut fields = FieldMap::new();
        for mapping in &self.mappings {
            if let Some(value) = mapping.evaluate(records, scope)? {
                fields.insert(mapping.name.clone(), value);
            }
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugsync_record::{FetchError, OnDemand};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn expr(source: &str) -> Expression {
        Expression::parse(source).unwrap()
    }

    fn vuln(app: &str, rel: &str, category: &str) -> Record {
        Record::new()
            .with("application", app)
            .with("release", rel)
            .with("category", category)
    }

    fn engine() -> GroupingEngine {
        GroupingEngine::new(expr("${application}:${release}"))
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let set = engine()
            .group_records(vec![
                vuln("AppA", "RelA", "XSS"),
                vuln("AppB", "RelB", "SQLi"),
                vuln("AppA", "RelA", "CSRF"),
            ])
            .unwrap();

        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["AppA:RelA", "AppB:RelB"]);
        let sizes: Vec<usize> = set.iter().map(|(_, g)| g.len()).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[test]
    fn shape_depends_on_force_grouping() {
        let records = || vec![vuln("A", "1", "x"), vuln("B", "1", "y"), vuln("A", "1", "z")];

        let set = engine().group_records(records()).unwrap();
        assert_eq!(set.get("A:1").unwrap().shape(), GroupShape::Grouped);
        assert_eq!(set.get("B:1").unwrap().shape(), GroupShape::Single);

        let forced = engine().with_force_grouping(true).group_records(records()).unwrap();
        assert_eq!(forced.get("B:1").unwrap().shape(), GroupShape::Grouped);
    }

    #[test]
    fn empty_keys_are_skipped_and_counted() {
        let set = GroupingEngine::new(expr("${application}"))
            .group_records(vec![
                vuln("A", "1", "x"),
                Record::new().with("category", "orphan"),
                Record::new().with("application", "  "),
            ])
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.unkeyed(), 2);
        assert_eq!(set.records(), 3);
    }

    #[test]
    fn aggregates_and_scope_variables() {
        let engine = engine()
            .with_mapping(FieldMapping::new("summary", expr("${@size} issues in ${@key}")))
            .with_mapping(FieldMapping::new("first", expr("${category}")))
            .with_mapping(
                FieldMapping::new("all", expr("${category}"))
                    .with_aggregate(Aggregate::Join)
                    .with_separator("; "),
            )
            .with_mapping(FieldMapping::new("kinds", expr("${category}")).with_aggregate(Aggregate::Distinct))
            .with_mapping(FieldMapping::new("n", expr("${category}")).with_aggregate(Aggregate::Count))
            .with_mapping(FieldMapping::new("app", expr("${application}")).with_aggregate(Aggregate::Single));

        let set = engine
            .group_records(vec![
                vuln("A", "1", "XSS"),
                vuln("A", "1", "SQLi"),
                vuln("A", "1", "XSS"),
            ])
            .unwrap();
        let group = set.get("A:1").unwrap();

        let expected: FieldMap = [
            ("summary", json!("3 issues in A:1")),
            ("first", json!("XSS")),
            ("all", json!("XSS; SQLi; XSS")),
            ("kinds", json!(["XSS", "SQLi"])),
            ("n", json!(3)),
            ("app", json!("A")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        assert_eq!(group.fields().unwrap(), &expected);
    }

    #[test]
    fn single_aggregate_rejects_disagreement() {
        let engine = GroupingEngine::new(expr("${application}")).with_mapping(
            FieldMapping::new("release", expr("${release}")).with_aggregate(Aggregate::Single),
        );
        let set = engine
            .group_records(vec![vuln("A", "1", "x"), vuln("A", "2", "y"), vuln("B", "1", "z")])
            .unwrap();

        let failed = set.get("A").unwrap();
        assert_eq!(failed.len(), 2);
        assert!(matches!(
            failed.fields(),
            Err(MappingError::Ambiguous { mapping, values }) if mapping == "release" && values == &["1", "2"]
        ));
        assert!(set.get("B").unwrap().fields().is_ok(), "failure is local to its group");
    }

    #[test]
    fn required_mapping_missing_fails_group() {
        let engine = engine()
            .with_mapping(FieldMapping::new("owner", expr("${owner}")).required())
            .with_mapping(FieldMapping::new("note", expr("${note}")));
        let set = engine.group_records(vec![vuln("A", "1", "x")]).unwrap();
        assert!(matches!(
            set.get("A:1").unwrap().fields(),
            Err(MappingError::Missing { mapping }) if mapping == "owner"
        ));
    }

    #[test]
    fn optional_mapping_field_failure_is_omitted() {
        let mut broken = vuln("A", "1", "x");
        broken.insert_on_demand("details", OnDemand::from_fn(|| Err(FetchError::transport("x"))));

        let optional = engine().with_mapping(FieldMapping::new("details", expr("${details}")));
        let set = optional.group_records(vec![broken.clone()]).unwrap();
        assert!(set.get("A:1").unwrap().fields().unwrap().is_empty());

        let required = engine().with_mapping(FieldMapping::new("details", expr("${details}")).required());
        let set = required.group_records(vec![broken]).unwrap();
        assert!(matches!(set.get("A:1").unwrap().fields(), Err(MappingError::Field { .. })));
    }

    #[test]
    fn key_failure_aborts_grouping() {
        let mut broken = Record::new();
        broken.insert_on_demand("application", OnDemand::from_fn(|| Err(FetchError::transport("x"))));
        let err = GroupingEngine::new(expr("${application}"))
            .group_records(vec![broken])
            .unwrap_err();
        assert!(matches!(err, GroupError::Key(_)));
    }

    #[test]
    fn retrieval_error_aborts_grouping() {
        let stream = vec![
            Ok(vuln("A", "1", "x")),
            Err(RetrieveError::Fetch {
                offset: 50,
                source: FetchError::transport("reset"),
            }),
        ];
        let err = engine().group(stream).unwrap_err();
        assert!(matches!(err, GroupError::Retrieve(_)));
    }

    #[test]
    fn first_aggregate_stops_at_first_value() {
        let mut lazy = vuln("A", "1", "x");
        lazy.insert_on_demand("details", OnDemand::from_fn(|| Ok(json!("should not load"))));
        let engine = engine().with_mapping(FieldMapping::new("cat", expr("${category}")));
        let set = engine.group_records(vec![vuln("A", "1", "first"), lazy]).unwrap();
        let group = set.get("A:1").unwrap();
        assert_eq!(group.fields().unwrap()["cat"], json!("first"));
        assert!(!group.records()[1].is_resolved("details"));
    }
}
