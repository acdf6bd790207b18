use std::collections::BTreeMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::coerce;
use crate::mapping::{map_payload, to_object};
use crate::spec::step::StepDefinition;
use crate::spec::webhook::{AuthType, SendType, WebhookDefinition};
use crate::transport::{HttpRequest, HttpTransport, TransportError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WebhookError {
    #[error("webhook request failed with status {status}")]
    WebhookExecutionFailed { status: u16 },
    #[error("webhook response is not valid JSON: {0}")]
    InvalidJson(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Request contents derived from the step values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WebhookPayload {
    pub body: Map<String, Value>,
    pub query: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMeta {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WebhookResponse {
    pub data: Value,
    pub meta: WebhookMeta,
}

/// `Content-Type: application/json`, then configured headers, then auth.
pub fn build_headers(definition: &WebhookDefinition) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.extend(
        definition
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );

    let auth_value = definition.auth_value.as_deref().unwrap_or_default();
    match definition.auth_type {
        AuthType::None => {}
        AuthType::Basic => {
            headers.insert("Authorization".into(), format!("Basic {auth_value}"));
        }
        AuthType::Bearer => {
            headers.insert("Authorization".into(), format!("Bearer {auth_value}"));
        }
        AuthType::Custom => {
            if let Some((name, value)) = auth_value.split_once(':')
                && !name.is_empty()
                && !value.is_empty()
            {
                headers.insert(name.to_string(), value.to_string());
            }
        }
    }

    headers
}

/// Builds the body and query for a step webhook.
///
/// Payload mapping entries take precedence; without them the body is
/// `{stepData, previousSteps}` unless selected body fields are configured.
/// `includeStepData: false` disables both. Selected fields are added on top,
/// looked up by field id or name in the step values.
pub fn build_payload(
    definition: &WebhookDefinition,
    step: &StepDefinition,
    step_values: &BTreeMap<String, Value>,
    previous_values: &BTreeMap<String, Value>,
) -> WebhookPayload {
    let mut payload = WebhookPayload::default();
    let has_body_fields = definition
        .selected_fields
        .iter()
        .any(|selected| selected.send_type == SendType::Body);

    if definition.include_step_data {
        if !definition.payload_mapping.is_empty() {
            payload.body = map_payload(step_values, previous_values, &definition.payload_mapping);
        } else if !has_body_fields {
            payload.body.insert("stepData".into(), to_object(step_values));
            payload
                .body
                .insert("previousSteps".into(), to_object(previous_values));
        }
    }

    for selected in &definition.selected_fields {
        let key = step
            .field(&selected.id)
            .map(|field| field.name.as_str())
            .unwrap_or(selected.id.as_str());
        let Some(value) = step_values.get(key) else {
            tracing::debug!(field = %selected.id, "selected webhook field has no value");
            continue;
        };
        match selected.send_type {
            SendType::Body => {
                payload.body.insert(selected.param_name.clone(), value.clone());
            }
            SendType::Query => payload
                .query
                .push((selected.param_name.clone(), query_value(value))),
        }
    }

    payload
}

pub(crate) fn query_value(value: &Value) -> String {
    match value {
        Value::Object(_) | Value::Array(_) => value.to_string(),
        other => coerce::as_text(other),
    }
}

/// Performs step webhook calls through an [`HttpTransport`].
#[derive(Clone)]
pub struct WebhookExecutor {
    transport: Arc<dyn HttpTransport>,
}

impl WebhookExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Sends the request. Non-2xx statuses and unparsable bodies are errors;
    /// an empty body parses as `null`.
    pub async fn execute(
        &self,
        definition: &WebhookDefinition,
        payload: &WebhookPayload,
    ) -> Result<WebhookResponse, WebhookError> {
        let mut request = HttpRequest::new(definition.method, definition.endpoint.clone());
        request.headers = build_headers(definition);
        request.query = payload.query.clone();
        if definition.method.allows_body() {
            request.body = Some(Value::Object(payload.body.clone()));
        } else {
            request
                .query
                .extend(payload.body.iter().map(|(key, value)| (key.clone(), query_value(value))));
        }

        tracing::debug!(
            method = definition.method.as_str(),
            endpoint = %definition.endpoint,
            "calling step webhook"
        );
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(WebhookError::WebhookExecutionFailed {
                status: response.status,
            });
        }

        let data = if response.body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&response.body)
                .map_err(|error| WebhookError::InvalidJson(error.to_string()))?
        };

        Ok(WebhookResponse {
            data,
            meta: WebhookMeta {
                status_code: response.status,
                headers: response.headers,
            },
        })
    }
}
