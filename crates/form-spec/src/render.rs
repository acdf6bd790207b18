use serde_json::{Map, Value, json};

use crate::session::{Phase, SessionSnapshot};
use crate::spec::field::{FieldOption, FieldRuntimeState, FieldType};
use crate::spec::form::FormDefinition;
use crate::validate::StepError;

/// Status labels returned by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// The current step is waiting for input.
    NeedInput,
    /// Every step has been submitted.
    Complete,
    /// The last submission failed and can be retried.
    Error,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::NeedInput => "need_input",
            RenderStatus::Complete => "complete",
            RenderStatus::Error => "error",
        }
    }
}

/// Step counters exposed to renderers. `step` is one-based.
#[derive(Debug, Clone)]
pub struct RenderProgress {
    pub step: usize,
    pub total: usize,
}

/// Describes a single field for render outputs.
#[derive(Debug, Clone)]
pub struct RenderField {
    pub id: String,
    pub name: String,
    pub label: String,
    pub kind: FieldType,
    pub placeholder: Option<String>,
    pub help_text: Option<String>,
    pub options: Option<Vec<FieldOption>>,
    pub mask: Option<String>,
    pub state: FieldRuntimeState,
    pub current_value: Option<Value>,
    pub errors: Vec<String>,
}

/// Collected payload used by both text and JSON renderers.
#[derive(Debug, Clone)]
pub struct RenderPayload {
    pub form_id: String,
    pub form_name: String,
    pub step_id: String,
    pub step_title: String,
    pub step_description: Option<String>,
    pub status: RenderStatus,
    pub progress: RenderProgress,
    pub submit_label: String,
    pub fields: Vec<RenderField>,
    /// Errors not attached to a field, such as webhook failures.
    pub step_errors: Vec<String>,
}

/// Build the renderer payload for the snapshot's current step.
pub fn build_render_payload(form: &FormDefinition, snapshot: &SessionSnapshot) -> RenderPayload {
    let total = form.steps.len();
    let index = snapshot.current_step_index.min(total.saturating_sub(1));
    let step = form.steps.get(index);
    let is_last = index + 1 >= total;

    let fields = step
        .map(|step| {
            step.fields
                .iter()
                .map(|field| RenderField {
                    id: field.id.clone(),
                    name: field.name.clone(),
                    label: field.label.clone(),
                    kind: field.kind,
                    placeholder: field.placeholder.clone(),
                    help_text: field.help_text.clone(),
                    options: field.options.clone(),
                    mask: field.mask().map(str::to_string),
                    state: snapshot
                        .field_states
                        .get(&field.id)
                        .copied()
                        .unwrap_or_else(|| FieldRuntimeState::from_definition(field)),
                    current_value: snapshot.values.get(&field.name).cloned(),
                    errors: errors_for(&snapshot.errors, &field.name),
                })
                .collect()
        })
        .unwrap_or_default();

    let step_errors = snapshot
        .errors
        .iter()
        .filter(|error| error.field.is_none())
        .map(|error| error.message.clone())
        .collect();

    let status = match snapshot.phase {
        Phase::Complete => RenderStatus::Complete,
        Phase::Error => RenderStatus::Error,
        _ => RenderStatus::NeedInput,
    };

    let submit_label = if is_last {
        form.submit_label.clone().unwrap_or_else(|| "Submit".to_string())
    } else {
        "Next".to_string()
    };

    RenderPayload {
        form_id: form.id.clone(),
        form_name: form.name.clone(),
        step_id: step.map(|step| step.id.clone()).unwrap_or_default(),
        step_title: step.map(|step| step.title.clone()).unwrap_or_default(),
        step_description: step.and_then(|step| step.description.clone()),
        status,
        progress: RenderProgress {
            step: index + 1,
            total,
        },
        submit_label,
        fields,
        step_errors,
    }
}

fn errors_for(errors: &[StepError], name: &str) -> Vec<String> {
    errors
        .iter()
        .filter(|error| error.field.as_deref() == Some(name))
        .map(|error| error.message.clone())
        .collect()
}

/// Render the payload as a structured JSON-friendly value. Hidden fields are
/// left out.
pub fn render_json_ui(payload: &RenderPayload) -> Value {
    let fields = payload
        .fields
        .iter()
        .filter(|field| field.state.visible)
        .map(|field| {
            let mut map = Map::new();
            map.insert("id".into(), Value::String(field.id.clone()));
            map.insert("name".into(), Value::String(field.name.clone()));
            map.insert("label".into(), Value::String(field.label.clone()));
            map.insert("type".into(), Value::String(field.kind.as_str().to_string()));
            map.insert("required".into(), Value::Bool(field.state.required));
            map.insert("disabled".into(), Value::Bool(field.state.disabled));
            if let Some(placeholder) = &field.placeholder {
                map.insert("placeholder".into(), Value::String(placeholder.clone()));
            }
            if let Some(help_text) = &field.help_text {
                map.insert("helpText".into(), Value::String(help_text.clone()));
            }
            if let Some(mask) = &field.mask {
                map.insert("mask".into(), Value::String(mask.clone()));
            }
            if let Some(options) = &field.options {
                map.insert(
                    "options".into(),
                    Value::Array(
                        options
                            .iter()
                            .map(|option| json!({ "label": option.label, "value": option.value }))
                            .collect(),
                    ),
                );
            }
            if let Some(current_value) = &field.current_value {
                map.insert("value".into(), current_value.clone());
            }
            if !field.errors.is_empty() {
                map.insert("errors".into(), json!(field.errors));
            }
            Value::Object(map)
        })
        .collect::<Vec<_>>();

    json!({
        "formId": payload.form_id,
        "formName": payload.form_name,
        "status": payload.status.as_str(),
        "step": {
            "id": payload.step_id,
            "title": payload.step_title,
            "description": payload.step_description,
        },
        "progress": {
            "step": payload.progress.step,
            "total": payload.progress.total,
        },
        "submitLabel": payload.submit_label,
        "fields": fields,
        "errors": payload.step_errors,
    })
}

/// Render the payload as human-friendly text.
pub fn render_text(payload: &RenderPayload) -> String {
    let mut lines = Vec::new();
    let title = if payload.form_name.is_empty() {
        &payload.form_id
    } else {
        &payload.form_name
    };
    lines.push(format!("Form: {} ({})", title, payload.form_id));
    lines.push(format!(
        "Status: {} (step {}/{})",
        payload.status.as_str(),
        payload.progress.step,
        payload.progress.total
    ));

    if payload.status == RenderStatus::Complete {
        lines.push("All steps are submitted.".to_string());
        return lines.join("\n");
    }

    lines.push(format!("Step: {}", payload.step_title));
    if let Some(description) = &payload.step_description {
        lines.push(format!("  {}", description));
    }
    for error in &payload.step_errors {
        lines.push(format!("Error: {}", error));
    }

    lines.push("Fields:".to_string());
    for field in payload.fields.iter().filter(|field| field.state.visible) {
        let mut entry = format!(" - {} ({})", field.name, field.label);
        if field.state.required {
            entry.push_str(" [required]");
        }
        if field.state.disabled {
            entry.push_str(" [disabled]");
        }
        if let Some(current_value) = &field.current_value {
            entry.push_str(&format!(" = {}", value_to_display(current_value)));
        }
        lines.push(entry);
        for error in &field.errors {
            lines.push(format!("     ! {}", error));
        }
    }

    lines.join("\n")
}

pub fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(num) => num.to_string(),
        other => other.to_string(),
    }
}
