//! Predicate evaluation over `(operator, actual, comparand)` triples, shared by
//! field conditions, step rules and payload rules.

use std::borrow::Cow;
use std::fmt;

use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coerce::{is_nullish, strict_equals, to_js_string, to_number};
use crate::path;

/// Comparison operators. Names are case-sensitive; anything unrecognised is
/// kept as [`Operator::Unknown`] and evaluates to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    Exists,
    NotExists,
    Between,
    Unknown(String),
}

impl Operator {
    pub fn parse(name: &str) -> Self {
        match name {
            "equals" => Operator::Equals,
            "notEquals" | "not_equals" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "notContains" | "not_contains" => Operator::NotContains,
            "greaterThan" | "greater" | "greater_than" => Operator::GreaterThan,
            "lessThan" | "less" | "less_than" => Operator::LessThan,
            "exists" => Operator::Exists,
            "notExists" | "not_exists" => Operator::NotExists,
            "between" => Operator::Between,
            other => Operator::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "notEquals",
            Operator::Contains => "contains",
            Operator::NotContains => "notContains",
            Operator::GreaterThan => "greaterThan",
            Operator::LessThan => "lessThan",
            Operator::Exists => "exists",
            Operator::NotExists => "notExists",
            Operator::Between => "between",
            Operator::Unknown(name) => name,
        }
    }
}

impl From<String> for Operator {
    fn from(value: String) -> Self {
        Operator::parse(&value)
    }
}

impl From<Operator> for String {
    fn from(value: Operator) -> Self {
        value.as_str().to_string()
    }
}

impl JsonSchema for Operator {
    fn schema_name() -> Cow<'static, str> {
        "Operator".into()
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "type": "string",
            "examples": ["equals", "notEquals", "contains", "notContains", "greaterThan",
                "lessThan", "exists", "notExists", "between"]
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluates `actual <operator> comparand`. `actual` is `None` when the
/// referenced value is missing.
pub fn evaluate(operator: &Operator, actual: Option<&Value>, comparand: &Value) -> bool {
    match operator {
        Operator::Equals => strict_equals(actual, Some(comparand)),
        Operator::NotEquals => !strict_equals(actual, Some(comparand)),
        Operator::Contains => contains(actual, comparand),
        Operator::NotContains => !contains(actual, comparand),
        Operator::GreaterThan => to_number(actual) > to_number(Some(comparand)),
        Operator::LessThan => to_number(actual) < to_number(Some(comparand)),
        Operator::Exists => !is_nullish(actual),
        Operator::NotExists => is_nullish(actual),
        Operator::Between => between(actual, comparand),
        Operator::Unknown(name) => {
            tracing::debug!(operator = %name, "unknown operator evaluates to true");
            true
        }
    }
}

fn contains(actual: Option<&Value>, comparand: &Value) -> bool {
    match actual {
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| strict_equals(Some(item), Some(comparand))),
        other => to_js_string(other).contains(&to_js_string(Some(comparand))),
    }
}

fn between(actual: Option<&Value>, comparand: &Value) -> bool {
    let Some([min, max]) = comparand.as_array().map(Vec::as_slice) else {
        return false;
    };
    let value = to_number(actual);
    value >= to_number(Some(min)) && value <= to_number(Some(max))
}

/// Evaluates a condition whose left side is a dotted path into `context`.
pub fn evaluate_path(
    context: &Map<String, Value>,
    field_path: &str,
    operator: &Operator,
    comparand: &Value,
) -> bool {
    evaluate(operator, path::resolve_in(context, field_path), comparand)
}
