use std::collections::BTreeMap;

use chrono::Datelike;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coerce;
use crate::expr::{Expression, to_fixed};
use crate::path;
use crate::spec::field::parse_date;
use crate::spec::mapping::{
    DataMappingRule, FieldTransformation, TransformationConfig, TransformationType,
};
use crate::spec::webhook::PayloadMapping;

pub use crate::path::extract_paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MappingOperationKind {
    Set,
    Transform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MappingOperation {
    pub field: String,
    pub operation: MappingOperationKind,
    pub value: Value,
}

/// Resolves every rule against `source`. Rules whose source path is missing
/// produce nothing. A transform that fails keeps the raw value and is still
/// reported as a `transform` operation.
pub fn apply_mapping(source: &Value, rules: &[DataMappingRule]) -> Vec<MappingOperation> {
    rules
        .iter()
        .filter_map(|rule| {
            let raw = path::resolve(source, &rule.source)?;
            let operation = match &rule.transform {
                None => MappingOperation {
                    field: rule.target.clone(),
                    operation: MappingOperationKind::Set,
                    value: raw.clone(),
                },
                Some(transform) => MappingOperation {
                    field: rule.target.clone(),
                    operation: MappingOperationKind::Transform,
                    value: run_transform(transform, raw, &rule.target),
                },
            };
            Some(operation)
        })
        .collect()
}

fn run_transform(transform: &Expression, raw: &Value, target: &str) -> Value {
    match transform.evaluate_with("value", raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(field = %target, %error, "mapping transform failed; keeping raw value");
            raw.clone()
        }
    }
}

/// Runs the transformation pipeline over `values` in order. Fields that are
/// absent are skipped; a failing transformation leaves the value untouched.
pub fn apply_transformations(
    values: &mut BTreeMap<String, Value>,
    transformations: &[FieldTransformation],
) {
    for transformation in transformations {
        let Some(current) = values.get(&transformation.field) else {
            continue;
        };
        match transform_value(current, transformation.kind, &transformation.config) {
            Ok(next) => {
                values.insert(transformation.field.clone(), next);
            }
            Err(reason) => {
                tracing::warn!(
                    field = %transformation.field,
                    kind = ?transformation.kind,
                    %reason,
                    "transformation failed; keeping value"
                );
            }
        }
    }
}

/// Applies a single transformation. The error is a human-readable reason.
pub fn transform_value(
    value: &Value,
    kind: TransformationType,
    config: &TransformationConfig,
) -> Result<Value, String> {
    match kind {
        TransformationType::Format => format_value(value, config.format.as_deref()),
        TransformationType::Calculate => match &config.formula {
            None => Ok(coerce::number_value(coerce::to_number(Some(value)))),
            Some(formula) => {
                let x = coerce::number_value(coerce::to_number(Some(value)));
                let mut bindings = Map::new();
                bindings.insert("x".into(), x.clone());
                bindings.insert("value".into(), x);
                formula.evaluate(&bindings).map_err(|error| error.to_string())
            }
        },
        TransformationType::Concat => {
            let separator = config
                .separator
                .as_deref()
                .filter(|separator| !separator.is_empty())
                .unwrap_or(" ");
            Ok(Value::String(match value {
                Value::Array(items) => items
                    .iter()
                    .map(coerce::as_text)
                    .collect::<Vec<_>>()
                    .join(separator),
                other => coerce::to_js_string(Some(other)),
            }))
        }
        TransformationType::Split => {
            let separator = config
                .separator
                .as_deref()
                .filter(|separator| !separator.is_empty())
                .unwrap_or(",");
            Ok(Value::Array(
                coerce::to_js_string(Some(value))
                    .split(separator)
                    .map(|part| Value::String(part.trim().to_string()))
                    .collect(),
            ))
        }
        TransformationType::Custom => match &config.custom_fn {
            None => Ok(value.clone()),
            Some(custom) => custom
                .evaluate_with("value", value)
                .map_err(|error| error.to_string()),
        },
    }
}

fn format_value(value: &Value, format: Option<&str>) -> Result<Value, String> {
    let Some(format) = format.filter(|format| !format.is_empty()) else {
        return Ok(Value::String(coerce::to_js_string(Some(value))));
    };

    if ["YYYY", "MM", "DD"].iter().any(|token| format.contains(token)) {
        let date = parse_date(value).ok_or_else(|| format!("'{}' is not a date", coerce::as_text(value)))?;
        let formatted = format
            .replacen("YYYY", &date.year().to_string(), 1)
            .replacen("MM", &format!("{:02}", date.month()), 1)
            .replacen("DD", &format!("{:02}", date.day()), 1);
        return Ok(Value::String(formatted));
    }

    if format.contains('#') {
        let decimals = format
            .split('.')
            .nth(1)
            .map(|fraction| fraction.chars().count())
            .unwrap_or(0);
        let number = coerce::to_number(Some(value));
        return to_fixed(number, decimals as f64)
            .map(Value::String)
            .map_err(|error| error.to_string());
    }

    Ok(Value::String(coerce::to_js_string(Some(value))))
}

/// Builds a request body from `{stepData, previousSteps}` through payload
/// mapping entries. Missing sources are left out; a failing transform keeps
/// the resolved value.
pub fn map_payload(
    step_data: &BTreeMap<String, Value>,
    previous_steps: &BTreeMap<String, Value>,
    mappings: &[PayloadMapping],
) -> Map<String, Value> {
    let mut root = Map::new();
    root.insert("stepData".into(), to_object(step_data));
    root.insert("previousSteps".into(), to_object(previous_steps));
    let root = Value::Object(root);

    let mut body = Map::new();
    for mapping in mappings {
        let Some(raw) = path::resolve(&root, &mapping.source) else {
            continue;
        };
        let value = match &mapping.transform {
            Some(transform) => run_transform(transform, raw, &mapping.target),
            None => raw.clone(),
        };
        path::set_path(&mut body, &mapping.target, value);
    }
    body
}

pub(crate) fn to_object(values: &BTreeMap<String, Value>) -> Value {
    Value::Object(values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}
