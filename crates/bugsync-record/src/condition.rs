//! Predicates over records
//!
//! [`Condition`] is the compiled predicate tree used by filters and by the
//! "is vulnerability open" check. It deserializes from tagged tables:
//!
//! ```toml
//! open = { op = "not", condition = { op = "is_true", value = "${removed}" } }
//! ```

use crate::error::{ExpressionError, FieldError};
use crate::expr::{display_value, Expression, Scope};
use crate::record::Record;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// Compiled predicate
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "ConditionSpec")]
pub enum Condition {
    /// Always true
    Always,
    /// Value is present and not null
    Exists(Expression),
    /// Value is truthy (see [`is_truthy`])
    IsTrue(Expression),
    /// Value equals a constant
    Equals(Expression, Value),
    /// Value equals one of several constants
    OneOf(Expression, Vec<Value>),
    /// Rendered value matches a regular expression
    Matches(Expression, Regex),
    /// Negation
    Not(Box<Condition>),
    /// Conjunction, short-circuiting
    All(Vec<Condition>),
    /// Disjunction, short-circuiting
    Any(Vec<Condition>),
}

impl Condition {
    /// Regex condition from a pattern
    ///
    /// # Errors
    /// Returns error if the pattern does not compile
    pub fn matches(value: Expression, pattern: &str) -> Result<Self, ExpressionError> {
        let regex = Regex::new(pattern).map_err(|e| ExpressionError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::Matches(value, regex))
    }

    /// Negate a condition
    #[inline]
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate against a record
    ///
    /// Only the fields needed to decide are resolved.
    ///
    /// # Errors
    /// Returns [`FieldError`] if a referenced on-demand field fails to load.
    pub fn evaluate(&self, record: &mut Record) -> Result<bool, FieldError> {
        self.evaluate_in(record, &Scope::new())
    }

    /// Evaluate against a record and scope
    ///
    /// # Errors
    /// Returns [`FieldError`] if a referenced on-demand field fails to load.
    pub fn evaluate_in(&self, record: &mut Record, scope: &Scope) -> Result<bool, FieldError> {
        match self {
            Self::Always => Ok(true),
            Self::Exists(expr) => Ok(expr.evaluate_in(record, scope)?.is_some()),
            Self::IsTrue(expr) => Ok(expr
                .evaluate_in(record, scope)?
                .as_ref()
                .is_some_and(is_truthy)),
            Self::Equals(expr, expected) => Ok(expr
                .evaluate_in(record, scope)?
                .as_ref()
                .is_some_and(|actual| values_equal(actual, expected))),
            Self::OneOf(expr, candidates) => {
                let Some(actual) = expr.evaluate_in(record, scope)? else {
                    return Ok(false);
                };
                Ok(candidates.iter().any(|c| values_equal(&actual, c)))
            }
            Self::Matches(expr, regex) => Ok(expr
                .evaluate_text(record, scope)?
                .is_some_and(|text| regex.is_match(&text))),
            Self::Not(inner) => Ok(!inner.evaluate_in(record, scope)?),
            Self::All(conditions) => {
                for condition in conditions {
                    if !condition.evaluate_in(record, scope)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(conditions) => {
                for condition in conditions {
                    if condition.evaluate_in(record, scope)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Truthiness of a value
///
/// - booleans are themselves
/// - numbers are true unless zero
/// - strings are true unless empty, `"false"` or `"0"` (case-insensitive)
/// - lists and objects are true unless empty
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim();
            !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Loose equality: exact, or equal text for scalars of different types
///
/// Lets a TOML `to = 5` match a source string `"5"`.
#[must_use]
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    let scalar = |v: &Value| matches!(v, Value::Bool(_) | Value::Number(_) | Value::String(_));
    scalar(actual) && scalar(expected) && display_value(actual) == display_value(expected)
}

/// Serialized form of [`Condition`]
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConditionSpec {
    /// See [`Condition::Always`]
    Always,
    /// See [`Condition::Exists`]
    Exists {
        /// Tested expression
        value: Expression,
    },
    /// See [`Condition::IsTrue`]
    IsTrue {
        /// Tested expression
        value: Expression,
    },
    /// See [`Condition::Equals`]
    Equals {
        /// Tested expression
        value: Expression,
        /// Expected constant
        to: Value,
    },
    /// See [`Condition::OneOf`]
    OneOf {
        /// Tested expression
        value: Expression,
        /// Accepted constants
        any_of: Vec<Value>,
    },
    /// See [`Condition::Matches`]
    Matches {
        /// Tested expression
        value: Expression,
        /// Regular expression
        pattern: String,
    },
    /// See [`Condition::Not`]
    Not {
        /// Negated condition
        condition: Box<ConditionSpec>,
    },
    /// See [`Condition::All`]
    All {
        /// Conjuncts
        conditions: Vec<ConditionSpec>,
    },
    /// See [`Condition::Any`]
    Any {
        /// Disjuncts
        conditions: Vec<ConditionSpec>,
    },
}

impl TryFrom<ConditionSpec> for Condition {
    type Error = ExpressionError;

    fn try_from(spec: ConditionSpec) -> Result<Self, Self::Error> {
        let compile_all = |specs: Vec<ConditionSpec>| {
            specs
                .into_iter()
                .map(Condition::try_from)
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(match spec {
            ConditionSpec::Always => Self::Always,
            ConditionSpec::Exists { value } => Self::Exists(value),
            ConditionSpec::IsTrue { value } => Self::IsTrue(value),
            ConditionSpec::Equals { value, to } => Self::Equals(value, to),
            ConditionSpec::OneOf { value, any_of } => Self::OneOf(value, any_of),
            ConditionSpec::Matches { value, pattern } => Self::matches(value, &pattern)?,
            ConditionSpec::Not { condition } => Self::try_from(*condition)?.negate(),
            ConditionSpec::All { conditions } => Self::All(compile_all(conditions)?),
            ConditionSpec::Any { conditions } => Self::Any(compile_all(conditions)?),
        })
    }
}
