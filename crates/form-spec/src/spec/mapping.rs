use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::expr::Expression;
use crate::path::extract_paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DataMappingRule {
    /// Dotted path into the source document.
    pub source: String,
    /// Target field id (or name).
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Expression>,
}

impl DataMappingRule {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: Expression) -> Self {
        self.transform = Some(transform);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransformationType {
    Format,
    Calculate,
    #[serde(alias = "concatenate")]
    Concat,
    Split,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransformationConfig {
    /// Date tokens (`YYYY`, `MM`, `DD`) or a `#` decimal pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Evaluated with the numeric value bound to `x` (and `value`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    /// Evaluated with the raw value bound to `value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_fn: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldTransformation {
    pub field: String,
    #[serde(rename = "type")]
    pub kind: TransformationType,
    #[serde(default)]
    pub config: TransformationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataMappingConfig {
    #[serde(default)]
    pub rules: Vec<DataMappingRule>,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<FieldTransformation>,
}

impl DataMappingConfig {
    /// Paths of the sample payload, for pickers. Empty when the sample is
    /// missing or is not valid JSON.
    pub fn sample_paths(&self) -> Vec<String> {
        self.sample_payload
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .map(|sample| extract_paths(&sample))
            .unwrap_or_default()
    }
}
