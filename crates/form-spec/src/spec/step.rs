use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rules::Operator;
use crate::spec::field::FieldDefinition;
use crate::spec::mapping::DataMappingConfig;
use crate::spec::webhook::{HttpMethod, VariableDefinition, WebhookDefinition};

/// Effects a step rule may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Show,
    Hide,
    Require,
    /// Advance two steps instead of one.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepRule {
    /// Dotted path into the merged value/variable map.
    #[serde(alias = "variablePath", alias = "variableName")]
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_fields: Vec<String>,
}

/// Rules are evaluated in declaration order when the step is submitted.
///
/// With an `endpoint`, the step is also checked remotely once its fields
/// pass; the response may block the step or feed the rules a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepConditionalLogic {
    #[serde(default, alias = "validation")]
    pub rules: Vec<StepRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub method: HttpMethod,
    /// Names of earlier-step values sent alongside the step's own values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload_fields: Vec<String>,
    /// Response key (dotted path) to form field name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub response_mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: String,
    pub order: usize,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookDefinition>,
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_logic: Option<StepConditionalLogic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_mapping: Option<DataMappingConfig>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, order: usize, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            order,
            title: title.into(),
            description: None,
            fields: Vec::new(),
            webhook: None,
            variables: Vec::new(),
            conditional_logic: None,
            data_mapping: None,
        }
    }

    /// The webhook, when configured and enabled.
    pub fn active_webhook(&self) -> Option<&WebhookDefinition> {
        self.webhook.as_ref().filter(|webhook| webhook.enabled)
    }

    pub fn rules(&self) -> &[StepRule] {
        self.conditional_logic
            .as_ref()
            .map(|logic| logic.rules.as_slice())
            .unwrap_or_default()
    }

    /// The conditional logic, when it names a remote check endpoint.
    pub fn remote_check(&self) -> Option<&StepConditionalLogic> {
        self.conditional_logic
            .as_ref()
            .filter(|logic| logic.endpoint.is_some())
    }

    pub fn field(&self, key: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|field| field.matches_key(key))
    }
}
