//! Declarative status conditions
//!
//! A condition is a comma-separated conjunction of requirements such as
//! `status.succeeded > 0` or `status.phase == Running`. A bare field path
//! (`status.completionTime`) requires the field to exist. Evaluation is a
//! pure function of the observed document; a missing or null field never
//! satisfies a requirement.

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Error raised when condition text cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionParseError {
    #[error("condition is empty")]
    Empty,

    #[error("invalid requirement '{0}'")]
    InvalidRequirement(String),

    #[error("invalid field path '{0}'")]
    InvalidPath(String),

    #[error("operator '{operator}' needs a numeric operand, got '{value}'")]
    NotNumeric { operator: String, value: String },
}

/// Dot-separated path into a structured document
///
/// Numeric segments index into arrays (`status.conditions.0.type`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, ConditionParseError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(ConditionParseError::InvalidPath(path.to_string()));
        }

        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments
            .iter()
            .any(|s| s.is_empty() || s.chars().any(char::is_whitespace))
        {
            return Err(ConditionParseError::InvalidPath(path.to_string()));
        }

        Ok(Self { segments })
    }

    /// Look up the value at this path; `null` counts as absent
    pub fn resolve<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        let mut current = document;
        for segment in &self.segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Comparison applied to the value found at a field path
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Exists,
    Equals(String),
    NotEquals(String),
    GreaterThan(f64),
    GreaterOrEqual(f64),
    LessThan(f64),
    LessOrEqual(f64),
}

impl Comparison {
    fn holds(&self, actual: &Value) -> bool {
        match self {
            Comparison::Exists => true,
            Comparison::Equals(expected) => loosely_equal(actual, expected),
            Comparison::NotEquals(expected) => !loosely_equal(actual, expected),
            Comparison::GreaterThan(bound) => as_number(actual).is_some_and(|n| n > *bound),
            Comparison::GreaterOrEqual(bound) => as_number(actual).is_some_and(|n| n >= *bound),
            Comparison::LessThan(bound) => as_number(actual).is_some_and(|n| n < *bound),
            Comparison::LessOrEqual(bound) => as_number(actual).is_some_and(|n| n <= *bound),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loosely_equal(actual: &Value, expected: &str) -> bool {
    match actual {
        Value::String(s) => s == expected,
        Value::Number(n) => match (n.as_f64(), expected.parse::<f64>()) {
            (Some(a), Ok(b)) => a == b,
            _ => n.to_string() == expected,
        },
        Value::Bool(b) => expected.parse::<bool>().is_ok_and(|e| e == *b),
        _ => false,
    }
}

/// A single field-path predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub path: FieldPath,
    pub comparison: Comparison,
}

impl Requirement {
    pub fn new(path: FieldPath, comparison: Comparison) -> Self {
        Self { path, comparison }
    }

    pub fn is_satisfied(&self, document: &Value) -> bool {
        self.path
            .resolve(document)
            .is_some_and(|actual| self.comparison.holds(actual))
    }

    fn parse(text: &str) -> Result<Self, ConditionParseError> {
        let text = text.trim();
        let Some(captures) = requirement_pattern().captures(text) else {
            return Err(ConditionParseError::InvalidRequirement(text.to_string()));
        };

        let path = FieldPath::parse(&captures["path"])?;
        let Some(operator) = captures.name("op") else {
            return Ok(Self::new(path, Comparison::Exists));
        };

        let value = unquote(captures["value"].trim());
        let numeric = |value: &str| {
            value.parse::<f64>().map_err(|_| ConditionParseError::NotNumeric {
                operator: operator.as_str().to_string(),
                value: value.to_string(),
            })
        };

        let comparison = match operator.as_str() {
            "==" | "=" => Comparison::Equals(value.to_string()),
            "!=" => Comparison::NotEquals(value.to_string()),
            ">" => Comparison::GreaterThan(numeric(value)?),
            ">=" => Comparison::GreaterOrEqual(numeric(value)?),
            "<" => Comparison::LessThan(numeric(value)?),
            "<=" => Comparison::LessOrEqual(numeric(value)?),
            other => return Err(ConditionParseError::InvalidRequirement(other.to_string())),
        };

        Ok(Self::new(path, comparison))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.comparison {
            Comparison::Exists => write!(f, "{}", self.path),
            Comparison::Equals(v) => write!(f, "{} == {}", self.path, v),
            Comparison::NotEquals(v) => write!(f, "{} != {}", self.path, v),
            Comparison::GreaterThan(v) => write!(f, "{} > {}", self.path, v),
            Comparison::GreaterOrEqual(v) => write!(f, "{} >= {}", self.path, v),
            Comparison::LessThan(v) => write!(f, "{} < {}", self.path, v),
            Comparison::LessOrEqual(v) => write!(f, "{} <= {}", self.path, v),
        }
    }
}

fn requirement_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<path>[^\s=!<>]+)(?:\s*(?P<op>==|!=|>=|<=|=|>|<)\s*(?P<value>\S.*))?$")
            .expect("requirement pattern is a valid regex")
    })
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Conjunction of requirements evaluated against an observed resource
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    requirements: Vec<Requirement>,
}

impl Condition {
    pub fn new(requirements: Vec<Requirement>) -> Result<Self, ConditionParseError> {
        if requirements.is_empty() {
            return Err(ConditionParseError::Empty);
        }
        Ok(Self { requirements })
    }

    pub fn parse(text: &str) -> Result<Self, ConditionParseError> {
        if text.trim().is_empty() {
            return Err(ConditionParseError::Empty);
        }
        let requirements = text
            .split(',')
            .map(Requirement::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(requirements)
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// True when every requirement holds on `document`
    pub fn is_satisfied(&self, document: &Value) -> bool {
        self.requirements.iter().all(|r| r.is_satisfied(document))
    }
}

impl FromStr for Condition {
    type Err = ConditionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::parse(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Outcome of evaluating a resource step's conditions on one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Succeeded,
    Failed,
    /// Neither condition holds yet
    Pending,
}

/// Evaluate success and failure conditions; failure wins a tie
pub fn evaluate(success: Option<&Condition>, failure: Option<&Condition>, document: &Value) -> Verdict {
    if failure.is_some_and(|c| c.is_satisfied(document)) {
        return Verdict::Failed;
    }
    if success.is_some_and(|c| c.is_satisfied(document)) {
        return Verdict::Succeeded;
    }
    Verdict::Pending
}
