use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::path;
use crate::spec::field::{AsyncValidation, FieldDefinition};
use crate::transport::{HttpRequest, HttpTransport};
use crate::webhook::query_value;

/// Message recorded when the remote validator cannot be reached or rejects.
pub const ASYNC_FAILURE_MESSAGE: &str = "Validation failed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum AsyncOutcome {
    /// Field values to overwrite, keyed by form field name.
    Valid { updates: BTreeMap<String, Value> },
    Invalid { message: String },
    /// A newer request for the same field was started; drop this result.
    Superseded,
}

/// Remote field validation with "last request wins" ordering per field.
pub struct AsyncValidator {
    transport: Arc<dyn HttpTransport>,
    latest: Mutex<HashMap<String, u64>>,
}

impl AsyncValidator {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            latest: Mutex::new(HashMap::new()),
        }
    }

    fn begin(&self, field: &str) -> u64 {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let id = latest.entry(field.to_string()).or_insert(0);
        *id += 1;
        *id
    }

    fn is_current(&self, field: &str, id: u64) -> bool {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        latest.get(field).copied() == Some(id)
    }

    /// Marks any in-flight request for `field` as stale without sending a
    /// new one.
    pub fn supersede(&self, field: &str) {
        self.begin(field);
    }

    /// Forgets every in-flight request so their results come back superseded.
    pub fn invalidate_all(&self) {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        for id in latest.values_mut() {
            *id += 1;
        }
    }

    /// Validates `value` remotely. Fields without an async config are valid
    /// with no updates.
    pub async fn validate(
        &self,
        field: &FieldDefinition,
        value: &Value,
        form_values: &BTreeMap<String, Value>,
    ) -> AsyncOutcome {
        let Some(config) = field.async_validation() else {
            return AsyncOutcome::Valid {
                updates: BTreeMap::new(),
            };
        };

        let id = self.begin(&field.name);
        let request = build_request(config, &field.name, value, form_values);
        let result = self.transport.send(request).await;

        if !self.is_current(&field.name, id) {
            tracing::debug!(field = %field.name, request = id, "stale async validation dropped");
            return AsyncOutcome::Superseded;
        }

        let response = match result {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                tracing::warn!(field = %field.name, status = response.status, "async validation rejected");
                return invalid();
            }
            Err(error) => {
                tracing::warn!(field = %field.name, %error, "async validation request failed");
                return invalid();
            }
        };

        let data: Value = match serde_json::from_str(&response.body) {
            Ok(data) => data,
            Err(error) => {
                tracing::warn!(field = %field.name, %error, "async validation returned invalid JSON");
                return invalid();
            }
        };

        let updates = config
            .response_mapping
            .iter()
            .filter_map(|(response_key, target)| {
                path::resolve(&data, response_key).map(|mapped| (target.clone(), mapped.clone()))
            })
            .collect();

        AsyncOutcome::Valid { updates }
    }
}

fn invalid() -> AsyncOutcome {
    AsyncOutcome::Invalid {
        message: ASYNC_FAILURE_MESSAGE.to_string(),
    }
}

/// `{...payloadFields, [field]: value}`; GET sends the same pairs as a query.
pub fn build_request(
    config: &AsyncValidation,
    field_name: &str,
    value: &Value,
    form_values: &BTreeMap<String, Value>,
) -> HttpRequest {
    let mut body = Map::new();
    for name in &config.payload_fields {
        match form_values.get(name) {
            Some(present) => {
                body.insert(name.clone(), present.clone());
            }
            None => tracing::debug!(field = %name, "payload field missing from form values"),
        }
    }
    body.insert(field_name.to_string(), value.clone());

    let mut request = HttpRequest::new(config.method, config.endpoint.clone());
    request
        .headers
        .insert("Content-Type".into(), "application/json".into());
    if config.method.allows_body() {
        request.body = Some(Value::Object(body));
    } else {
        request.query = body
            .iter()
            .map(|(key, value)| (key.clone(), query_value(value)))
            .collect();
    }
    request
}
