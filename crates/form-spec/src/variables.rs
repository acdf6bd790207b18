use std::collections::BTreeMap;

use serde_json::Value;

use crate::coerce;
use crate::path;
use crate::spec::webhook::{VariableDefinition, VariableType};

/// Builds the named-variable map for a webhook response.
///
/// Missing paths go through the same coercion as present ones, so a missing
/// `number` becomes `null` (from `NaN`) and a missing `string` becomes
/// `"undefined"`. Later definitions overwrite earlier ones with the same name.
pub fn extract_variables(
    body: &Value,
    definitions: &[VariableDefinition],
) -> BTreeMap<String, Value> {
    definitions
        .iter()
        .map(|definition| {
            let resolved = path::resolve(body, &definition.path);
            (definition.name.clone(), coerce_variable(definition.kind, resolved))
        })
        .collect()
}

pub fn coerce_variable(kind: VariableType, value: Option<&Value>) -> Value {
    match kind {
        VariableType::Number => coerce::number_value(coerce::to_number(value)),
        VariableType::Boolean => Value::Bool(coerce::truthy(value)),
        VariableType::Array => match value {
            Some(Value::Array(items)) => Value::Array(items.clone()),
            Some(other) => Value::Array(vec![other.clone()]),
            None => Value::Array(vec![Value::Null]),
        },
        VariableType::String => Value::String(coerce::to_js_string(value)),
    }
}
