use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::expr::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
        }
    }

    pub fn allows_body(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Basic,
    Bearer,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum SendType {
    #[default]
    Body,
    Query,
}

/// A form field forwarded to the webhook under `param_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectedField {
    pub id: String,
    pub param_name: String,
    #[serde(default)]
    pub send_type: SendType,
}

/// Builds one body entry from `{stepData, previousSteps}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PayloadMapping {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDefinition {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub endpoint: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_value: Option<String>,
    #[serde(default)]
    pub selected_fields: Vec<SelectedField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload_mapping: Vec<PayloadMapping>,
    #[serde(default = "default_true")]
    pub include_step_data: bool,
}

fn default_true() -> bool {
    true
}

impl WebhookDefinition {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            enabled: true,
            endpoint: endpoint.into(),
            method,
            headers: BTreeMap::new(),
            auth_type: AuthType::None,
            auth_value: None,
            selected_fields: Vec::new(),
            payload_mapping: Vec::new(),
            include_step_data: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
}

/// Names a value inside a webhook response. Rebuilt on every webhook call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VariableDefinition {
    pub name: String,
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: VariableType,
}

impl VariableDefinition {
    pub fn new(name: impl Into<String>, path: impl Into<String>, kind: VariableType) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind,
        }
    }
}
