use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce;
use crate::rules::Operator;
use crate::spec::webhook::HttpMethod;

/// Primitive input kinds a field can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Email,
    Password,
    Number,
    Tel,
    Textarea,
    Select,
    Radio,
    Checkbox,
    Date,
    Time,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Password => "password",
            FieldType::Number => "number",
            FieldType::Tel => "tel",
            FieldType::Textarea => "textarea",
            FieldType::Select => "select",
            FieldType::Radio => "radio",
            FieldType::Checkbox => "checkbox",
            FieldType::Date => "date",
            FieldType::Time => "time",
        }
    }

    /// Formats a mapped value for this field kind.
    ///
    /// Numbers go through `Number()` (non-finite results become `null`),
    /// checkboxes through truthiness, dates become ISO 8601 strings and
    /// everything else is stringified. Unparsable dates are stringified.
    pub fn coerce(&self, value: &Value) -> Value {
        match self {
            FieldType::Number => coerce::number_value(coerce::to_number(Some(value))),
            FieldType::Checkbox => Value::Bool(coerce::truthy(Some(value))),
            FieldType::Date => match parse_date(value) {
                Some(date) => Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true)),
                None => Value::String(coerce::to_js_string(Some(value))),
            },
            _ => Value::String(coerce::to_js_string(Some(value))),
        }
    }

    pub fn has_options(&self) -> bool {
        matches!(self, FieldType::Select | FieldType::Radio | FieldType::Checkbox)
    }
}

/// Parses the date representations accepted by the engine: epoch
/// milliseconds, RFC 3339 timestamps, `YYYY-MM-DD` and naive date-times.
pub(crate) fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => {
            let millis = number.as_f64()?;
            if !millis.is_finite() {
                return None;
            }
            DateTime::from_timestamp_millis(millis as i64)
        }
        Value::String(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
            }
            ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldOption {
    pub label: String,
    pub value: String,
}

/// Rule kinds understood by the synchronous validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ValidationRuleType {
    Required,
    Email,
    MinLength,
    MaxLength,
    Pattern,
    Cpf,
    Cnpj,
    Phone,
    Cep,
    Custom,
}

impl ValidationRuleType {
    pub fn default_message(&self) -> &'static str {
        match self {
            ValidationRuleType::Required => "This field is required",
            ValidationRuleType::Email => "Invalid email",
            ValidationRuleType::MinLength => "Minimum length not reached",
            ValidationRuleType::MaxLength => "Maximum length exceeded",
            ValidationRuleType::Pattern => "Invalid format",
            ValidationRuleType::Cpf => "Invalid CPF",
            ValidationRuleType::Cnpj => "Invalid CNPJ",
            ValidationRuleType::Phone => "Invalid phone number",
            ValidationRuleType::Cep => "Invalid CEP",
            ValidationRuleType::Custom => "Custom validation failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationRule {
    #[serde(rename = "type")]
    pub kind: ValidationRuleType,
    /// Length for min/max rules, regex source for `pattern`, expression for `custom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub message: String,
}

impl ValidationRule {
    pub fn new(kind: ValidationRuleType) -> Self {
        Self {
            kind,
            value: None,
            message: String::new(),
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The configured message, or the rule type's default when blank.
    pub fn message(&self) -> &str {
        if self.message.trim().is_empty() {
            self.kind.default_message()
        } else {
            &self.message
        }
    }
}

/// Remote validation performed after the synchronous rules pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AsyncValidation {
    pub endpoint: String,
    #[serde(default = "default_async_method")]
    pub method: HttpMethod,
    #[serde(default)]
    pub payload_fields: Vec<String>,
    /// Response key (dotted path) to form field name.
    #[serde(default)]
    pub response_mapping: BTreeMap<String, String>,
}

fn default_async_method() -> HttpMethod {
    HttpMethod::Post
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfig {
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    #[serde(default, rename = "async", skip_serializing_if = "Option::is_none")]
    pub async_validation: Option<AsyncValidation>,
}

/// Field-level effects of a matching condition block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FieldAction {
    Show,
    Hide,
    Require,
    Optional,
    Populate,
    Disable,
    Enable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldCondition {
    /// Dotted path into the merged value/variable map.
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

/// Conditions are ANDed; there is no OR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldConditionalLogic {
    #[serde(default)]
    pub conditions: Vec<FieldCondition>,
    pub action: FieldAction,
    /// Value written by `populate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Condition evaluated against the variables extracted from the step webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookFieldCondition {
    pub variable_path: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    pub action: FieldAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub kind: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FieldOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_logic: Option<FieldConditionalLogic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhook_conditions: Vec<WebhookFieldCondition>,
}

impl FieldDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: FieldType) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            label: name.clone(),
            name,
            kind,
            required: false,
            order: 0,
            placeholder: None,
            help_text: None,
            options: None,
            validation: None,
            conditional_logic: None,
            webhook_conditions: Vec::new(),
        }
    }

    pub fn rules(&self) -> &[ValidationRule] {
        self.validation
            .as_ref()
            .map(|config| config.rules.as_slice())
            .unwrap_or_default()
    }

    pub fn mask(&self) -> Option<&str> {
        self.validation
            .as_ref()
            .and_then(|config| config.mask.as_deref())
    }

    pub fn async_validation(&self) -> Option<&AsyncValidation> {
        self.validation
            .as_ref()
            .and_then(|config| config.async_validation.as_ref())
    }

    /// True when either the id or the name equals `key`.
    pub fn matches_key(&self, key: &str) -> bool {
        self.id == key || self.name == key
    }
}

/// Derived per-render state of a field. Never stored in definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FieldRuntimeState {
    pub visible: bool,
    pub required: bool,
    pub disabled: bool,
}

impl FieldRuntimeState {
    pub fn from_definition(field: &FieldDefinition) -> Self {
        Self {
            visible: true,
            required: field.required,
            disabled: false,
        }
    }
}
