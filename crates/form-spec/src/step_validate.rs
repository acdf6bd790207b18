//! Remote step checks run on submit, after the step's fields pass their own
//! rules and before its webhook.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::path;
use crate::session::ValueMap;
use crate::spec::step::StepConditionalLogic;
use crate::transport::{HttpRequest, HttpTransport};
use crate::webhook::query_value;

/// Step-level error recorded when the check cannot be completed.
pub const STEP_CHECK_FAILURE_MESSAGE: &str = "Step validation failed";

#[derive(Debug, Clone, PartialEq)]
pub enum StepCheck {
    /// The step may advance. `payload` joins the step's variables so the step
    /// rules see it; `updates` are field values keyed by form field name.
    Passed {
        payload: Map<String, Value>,
        updates: BTreeMap<String, Value>,
    },
    /// The step stays put with these messages.
    Failed { errors: Vec<String> },
}

impl StepCheck {
    fn passed() -> Self {
        StepCheck::Passed {
            payload: Map::new(),
            updates: BTreeMap::new(),
        }
    }

    fn failed() -> Self {
        StepCheck::Failed {
            errors: vec![STEP_CHECK_FAILURE_MESSAGE.to_string()],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CheckResponse {
    errors: Option<Vec<String>>,
    payload: Value,
}

/// Calls a step's check endpoint through an [`HttpTransport`].
#[derive(Clone)]
pub struct StepValidator {
    transport: Arc<dyn HttpTransport>,
}

impl StepValidator {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Checks the submitted step. Logic without an endpoint always passes.
    pub async fn check(
        &self,
        logic: &StepConditionalLogic,
        current: &ValueMap,
        previous: &ValueMap,
    ) -> StepCheck {
        let Some(request) = build_request(logic, current, previous) else {
            return StepCheck::passed();
        };
        let endpoint = request.url.clone();

        let response = match self.transport.send(request).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                tracing::warn!(%endpoint, status = response.status, "step check rejected");
                return StepCheck::failed();
            }
            Err(error) => {
                tracing::warn!(%endpoint, %error, "step check request failed");
                return StepCheck::failed();
            }
        };

        let data: Value = match serde_json::from_str(&response.body) {
            Ok(data) => data,
            Err(error) => {
                tracing::warn!(%endpoint, %error, "step check returned invalid JSON");
                return StepCheck::failed();
            }
        };
        let parsed = match CheckResponse::deserialize(&data) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(%endpoint, %error, "step check response has an unexpected shape");
                return StepCheck::failed();
            }
        };

        let errors = parsed.errors.unwrap_or_default();
        if !errors.is_empty() {
            tracing::debug!(%endpoint, errors = errors.len(), "step check refused the step");
            return StepCheck::Failed { errors };
        }

        let payload = match parsed.payload {
            Value::Object(payload) => payload,
            _ => Map::new(),
        };
        let updates = logic
            .response_mapping
            .iter()
            .filter_map(|(response_key, target)| {
                path::resolve(&data, response_key).map(|mapped| (target.clone(), mapped.clone()))
            })
            .collect();

        StepCheck::Passed { payload, updates }
    }
}

/// `{currentStep, previousData, payloadFields?}`; GET sends each top-level
/// key as a query parameter instead.
pub fn build_request(
    logic: &StepConditionalLogic,
    current: &ValueMap,
    previous: &ValueMap,
) -> Option<HttpRequest> {
    let endpoint = logic.endpoint.as_ref()?;

    let mut body = Map::new();
    body.insert("currentStep".into(), to_object(current));
    body.insert("previousData".into(), to_object(previous));

    let mut picked = Map::new();
    for name in &logic.payload_fields {
        match current.get(name).or_else(|| previous.get(name)) {
            Some(value) => {
                picked.insert(name.clone(), value.clone());
            }
            None => tracing::debug!(field = %name, "payload field missing from form values"),
        }
    }
    if !picked.is_empty() {
        body.insert("payloadFields".into(), Value::Object(picked));
    }

    let mut request = HttpRequest::new(logic.method, endpoint.clone());
    request
        .headers
        .insert("Content-Type".into(), "application/json".into());
    if logic.method.allows_body() {
        request.body = Some(Value::Object(body));
    } else {
        request.query = body
            .iter()
            .map(|(key, value)| (key.clone(), query_value(value)))
            .collect();
    }
    Some(request)
}

fn to_object(values: &ValueMap) -> Value {
    Value::Object(
        values
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}
