//! Compiled value expressions
//!
//! Expressions are written as templates: `${path}` reads a record field,
//! `${@name}` reads a scope variable (e.g. `@key`, `@size` during grouping),
//! `$${` is a literal `${`. A template that is exactly one placeholder keeps
//! the raw value; anything else renders to a string.

use crate::error::{ExpressionError, FieldError};
use crate::path::FieldPath;
use crate::record::Record;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Named values visible to expressions besides record fields
pub type Scope = IndexMap<String, Value>;

/// Piece of a template expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text
    Literal(String),
    /// Record field, rendered as text
    Field(FieldPath),
    /// Scope variable, rendered as text
    Variable(String),
}

/// Value expression over a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Expression {
    /// Fixed value
    Constant(Value),
    /// Raw value of a record field path
    Field(FieldPath),
    /// Raw value of a scope variable
    Variable(String),
    /// Interpolated text
    Template(Vec<Segment>),
}

impl Expression {
    /// Parse expression source
    ///
    /// # Errors
    /// Returns error on unterminated placeholders or invalid paths
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(dollar) = rest.find('$') {
            literal.push_str(&rest[..dollar]);
            let after = &rest[dollar + 1..];
            let at = offset + dollar;

            if let Some(escaped) = after.strip_prefix("${") {
                literal.push_str("${");
                offset = at + 3;
                rest = escaped;
            } else if let Some(open) = after.strip_prefix('{') {
                let close = open.find('}').ok_or(ExpressionError::Unterminated(at))?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(parse_placeholder(open[..close].trim(), at)?);
                offset = at + 2 + close + 1;
                rest = &open[close + 1..];
            } else {
                literal.push('$');
                offset = at + 1;
                rest = after;
            }
        }
        literal.push_str(rest);

        if segments.is_empty() {
            return Ok(Self::Constant(Value::String(literal)));
        }
        if segments.len() == 1 && literal.is_empty() {
            match segments.pop() {
                Some(Segment::Field(path)) => return Ok(Self::Field(path)),
                Some(Segment::Variable(name)) => return Ok(Self::Variable(name)),
                Some(other) => segments.push(other),
                None => {}
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self::Template(segments))
    }

    /// Expression reading one field
    #[inline]
    #[must_use]
    pub fn field(path: FieldPath) -> Self {
        Self::Field(path)
    }

    /// Constant expression
    #[inline]
    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    /// Evaluate against a record with no scope variables
    ///
    /// # Errors
    /// Returns [`FieldError`] if a referenced on-demand field fails to load.
    pub fn evaluate(&self, record: &mut Record) -> Result<Option<Value>, FieldError> {
        self.evaluate_in(record, &Scope::new())
    }

    /// Evaluate against a record and scope
    ///
    /// Null values count as absent.
    ///
    /// # Errors
    /// Returns [`FieldError`] if a referenced on-demand field fails to load.
    pub fn evaluate_in(&self, record: &mut Record, scope: &Scope) -> Result<Option<Value>, FieldError> {
        let value = match self {
            Self::Constant(value) => Some(value.clone()),
            Self::Field(path) => record.resolve_path(path)?,
            Self::Variable(name) => scope.get(name).cloned(),
            Self::Template(segments) => {
                let mut rendered = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => rendered.push_str(text),
                        Segment::Field(path) => {
                            if let Some(value) = record.resolve_path(path)? {
                                rendered.push_str(&display_value(&value));
                            }
                        }
                        Segment::Variable(name) => {
                            if let Some(value) = scope.get(name) {
                                rendered.push_str(&display_value(value));
                            }
                        }
                    }
                }
                Some(Value::String(rendered))
            }
        };
        Ok(value.filter(|v| !v.is_null()))
    }

    /// Evaluate and render as text
    ///
    /// # Errors
    /// Returns [`FieldError`] if a referenced on-demand field fails to load.
    pub fn evaluate_text(&self, record: &mut Record, scope: &Scope) -> Result<Option<String>, FieldError> {
        Ok(self
            .evaluate_in(record, scope)?
            .map(|value| display_value(&value)))
    }
}

fn parse_placeholder(inner: &str, at: usize) -> Result<Segment, ExpressionError> {
    if let Some(name) = inner.strip_prefix('@') {
        let name = name.trim();
        if name.is_empty() {
            return Err(ExpressionError::EmptyVariable(at));
        }
        return Ok(Segment::Variable(name.to_string()));
    }
    inner
        .parse::<FieldPath>()
        .map(Segment::Field)
        .map_err(|source| ExpressionError::InvalidPath {
            placeholder: inner.to_string(),
            source,
        })
}

/// Render a value as plain text
///
/// Strings render bare, null renders empty, lists join their rendered
/// elements with `", "`, objects render as JSON.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => write!(f, "{}", display_value(value).replace("${", "$${")),
            Self::Field(path) => write!(f, "${{{path}}}"),
            Self::Variable(name) => write!(f, "${{@{name}}}"),
            Self::Template(segments) => {
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => write!(f, "{}", text.replace("${", "$${"))?,
                        Segment::Field(path) => write!(f, "${{{path}}}")?,
                        Segment::Variable(name) => write!(f, "${{@{name}}}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Expression {
    type Error = ExpressionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Expression> for String {
    fn from(expression: Expression) -> Self {
        expression.to_string()
    }
}
