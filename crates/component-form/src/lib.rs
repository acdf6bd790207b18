use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use form_spec::{
    DataMappingRule, FieldTransformation, FormDefinition, Operator, Phase, SessionSnapshot,
    SpecError, StepDefinition, StepError, ValidationRule, VariableDefinition,
    build_render_payload, form_schema, resolve_field_states,
    render_json_ui as form_render_json_ui, render_text as form_render_text,
};

const DEFAULT_FORM: &str = include_str!("../../form-spec/tests/fixtures/signup_form.json");

#[derive(Debug, Error)]
enum ComponentError {
    #[error("failed to parse config/{0}")]
    ConfigParse(#[source] serde_json::Error),
    #[error("failed to parse input: {0}")]
    InputParse(#[source] serde_json::Error),
    #[error("form '{0}' is not available")]
    FormUnavailable(String),
    #[error("form '{form}' has no step {index}")]
    StepUnavailable { form: String, index: usize },
    #[error("invalid form: {0}")]
    Spec(#[from] SpecError),
    #[error("json encode error: {0}")]
    JsonEncode(#[source] serde_json::Error),
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct ComponentConfig {
    #[serde(default)]
    form_json: Option<String>,
}

/// Stateless view of a session: which step, and what has been entered.
#[derive(Debug, Deserialize, Default)]
struct StepContext {
    #[serde(default)]
    step: usize,
    #[serde(default)]
    values: Map<String, Value>,
    #[serde(default)]
    variables: Map<String, Value>,
    #[serde(default)]
    errors: Vec<StepError>,
}

fn load_form(config_json: &str) -> Result<FormDefinition, ComponentError> {
    let config = if config_json.trim().is_empty() {
        ComponentConfig::default()
    } else {
        serde_json::from_str(config_json).map_err(ComponentError::ConfigParse)?
    };

    let form_json = config.form_json.as_deref().unwrap_or(DEFAULT_FORM);
    let form: FormDefinition = serde_json::from_str(form_json).map_err(ComponentError::ConfigParse)?;
    form.check()?;
    Ok(form.ordered())
}

fn ensure_form(form_id: &str, config_json: &str) -> Result<FormDefinition, ComponentError> {
    let form = load_form(config_json)?;
    if form.id != form_id {
        Err(ComponentError::FormUnavailable(form_id.to_string()))
    } else {
        Ok(form)
    }
}

fn ensure_step(form: &FormDefinition, index: usize) -> Result<&StepDefinition, ComponentError> {
    form.steps
        .get(index)
        .ok_or_else(|| ComponentError::StepUnavailable {
            form: form.id.clone(),
            index,
        })
}

fn parse_input<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, ComponentError> {
    serde_json::from_str(raw).map_err(ComponentError::InputParse)
}

fn parse_context(ctx_json: &str) -> StepContext {
    serde_json::from_str(ctx_json).unwrap_or_default()
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ComponentError> {
    serde_json::to_value(value).map_err(ComponentError::JsonEncode)
}

fn respond(result: Result<Value, ComponentError>) -> String {
    match result {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|error| {
            json!({"error": format!("json encode: {}", error)}).to_string()
        }),
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

fn respond_string(result: Result<String, ComponentError>) -> String {
    match result {
        Ok(value) => value,
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

pub fn describe(form_id: &str, config_json: &str) -> String {
    respond(ensure_form(form_id, config_json).and_then(|form| to_json(&form)))
}

pub fn check_form(config_json: &str) -> String {
    respond(load_form(config_json).map(|form| {
        json!({
            "valid": true,
            "id": form.id,
            "steps": form.steps.len(),
        })
    }))
}

pub fn get_form_schema() -> String {
    respond(Ok(form_schema()))
}

pub fn validate_value(rules_json: &str, value_json: &str) -> String {
    respond((|| -> Result<Value, ComponentError> {
        let rules: Vec<ValidationRule> = parse_input(rules_json)?;
        let value: Value = parse_input(value_json)?;
        to_json(&form_spec::validate_sync(&value, &rules))
    })())
}

/// Validates the values of one step against its field rules and the field
/// states derived from the context.
pub fn validate_step(form_id: &str, config_json: &str, ctx_json: &str) -> String {
    respond(ensure_form(form_id, config_json).and_then(|form| {
        let ctx = parse_context(ctx_json);
        let step = ensure_step(&form, ctx.step)?;
        let resolution = resolve_field_states(step, &condition_context(&ctx), &ctx.variables, &[]);
        let values: BTreeMap<String, Value> = ctx.values.clone().into_iter().collect();
        let errors = form_spec::validate_step(step, &values, &resolution.states);
        Ok(json!({
            "valid": errors.is_empty(),
            "errors": to_json(&errors)?,
        }))
    }))
}

pub fn evaluate_rule(operator: &str, field_value_json: &str, rule_value_json: &str) -> String {
    respond((|| -> Result<Value, ComponentError> {
        let operator: Operator = serde_json::from_value(Value::String(operator.to_string()))
            .map_err(ComponentError::InputParse)?;
        let rule_value: Value = parse_input(rule_value_json)?;
        let field_value: Option<Value> = if field_value_json.trim().is_empty() {
            None
        } else {
            Some(parse_input(field_value_json)?)
        };
        Ok(json!({
            "result": form_spec::evaluate(&operator, field_value.as_ref(), &rule_value),
        }))
    })())
}

pub fn extract_variables(response_json: &str, definitions_json: &str) -> String {
    respond((|| -> Result<Value, ComponentError> {
        let response: Value = parse_input(response_json)?;
        let definitions: Vec<VariableDefinition> = parse_input(definitions_json)?;
        to_json(&form_spec::extract_variables(&response, &definitions))
    })())
}

pub fn extract_paths(payload_json: &str) -> String {
    respond(
        parse_input::<Value>(payload_json).map(|payload| json!(form_spec::extract_paths(&payload))),
    )
}

pub fn apply_mapping(source_json: &str, rules_json: &str) -> String {
    respond((|| -> Result<Value, ComponentError> {
        let source: Value = parse_input(source_json)?;
        let rules: Vec<DataMappingRule> = parse_input(rules_json)?;
        to_json(&form_spec::apply_mapping(&source, &rules))
    })())
}

pub fn apply_transformations(values_json: &str, transformations_json: &str) -> String {
    respond((|| -> Result<Value, ComponentError> {
        let mut values: BTreeMap<String, Value> = parse_input(values_json)?;
        let transformations: Vec<FieldTransformation> = parse_input(transformations_json)?;
        form_spec::apply_transformations(&mut values, &transformations);
        to_json(&values)
    })())
}

pub fn apply_mask(mask: &str, input: &str) -> String {
    respond(Ok(json!({ "value": form_spec::apply_mask(mask, input) })))
}

/// Field states of the context's step, keyed by field id.
pub fn resolve_fields(form_id: &str, config_json: &str, ctx_json: &str) -> String {
    respond(ensure_form(form_id, config_json).and_then(|form| {
        let ctx = parse_context(ctx_json);
        let step = ensure_step(&form, ctx.step)?;
        let resolution = resolve_field_states(step, &condition_context(&ctx), &ctx.variables, &[]);
        Ok(json!({
            "fields": to_json(&resolution.states)?,
            "populate": to_json(&resolution.populate)?,
            "hidden": resolution.hidden,
        }))
    }))
}

fn condition_context(ctx: &StepContext) -> Map<String, Value> {
    let mut context = ctx.values.clone();
    context.extend(ctx.variables.clone());
    context
}

fn snapshot(form: &FormDefinition, ctx: StepContext) -> Result<SessionSnapshot, ComponentError> {
    let step = ensure_step(form, ctx.step)?;
    let resolution = resolve_field_states(step, &condition_context(&ctx), &ctx.variables, &[]);
    let phase = if ctx.errors.iter().any(|error| error.field.is_none()) {
        Phase::Error
    } else {
        Phase::Idle
    };
    Ok(SessionSnapshot {
        phase,
        current_step_index: ctx.step,
        loading: false,
        field_states: resolution.states,
        values: ctx.values.into_iter().collect(),
        errors: ctx.errors,
    })
}

pub fn render_text(form_id: &str, config_json: &str, ctx_json: &str) -> String {
    respond_string(ensure_form(form_id, config_json).and_then(|form| {
        let snapshot = snapshot(&form, parse_context(ctx_json))?;
        Ok(form_render_text(&build_render_payload(&form, &snapshot)))
    }))
}

pub fn render_json_ui(form_id: &str, config_json: &str, ctx_json: &str) -> String {
    respond(ensure_form(form_id, config_json).and_then(|form| {
        let snapshot = snapshot(&form, parse_context(ctx_json))?;
        Ok(form_render_json_ui(&build_render_payload(&form, &snapshot)))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: &str) -> Value {
        serde_json::from_str(raw).expect("json")
    }

    #[test]
    fn describe_returns_form_json() {
        let form = parse(&describe("signup", ""));
        assert_eq!(form["id"], "signup");
        assert_eq!(form["steps"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn describe_rejects_other_forms() {
        let response = parse(&describe("other", ""));
        assert_eq!(response["error"], "form 'other' is not available");
    }

    #[test]
    fn check_form_reports_structural_errors() {
        let form = json!({
            "id": "broken",
            "steps": [
                { "id": "a", "order": 0 },
                { "id": "b", "order": 2 }
            ]
        });
        let config = json!({ "form_json": form.to_string() });
        let response = parse(&check_form(&config.to_string()));
        assert!(response["error"].as_str().unwrap().contains("contiguous"));

        let ok = parse(&check_form(""));
        assert_eq!(ok["valid"], true);
        assert_eq!(ok["steps"], 3);
    }

    #[test]
    fn schema_describes_forms() {
        let schema = parse(&get_form_schema());
        assert!(schema["properties"]["steps"].is_object());
    }

    #[test]
    fn validate_value_reports_messages() {
        let rules = json!([{ "type": "cpf", "message": "CPF inválido" }]);
        let invalid = parse(&validate_value(&rules.to_string(), r#""111.111.111-11""#));
        assert_eq!(invalid["isValid"], false);
        assert_eq!(invalid["errors"][0], "CPF inválido");

        let valid = parse(&validate_value(&rules.to_string(), r#""529.982.247-25""#));
        assert_eq!(valid["isValid"], true);
    }

    #[test]
    fn validate_step_uses_derived_states() {
        let ctx = json!({ "step": 1, "values": { "plan": "basic", "card": "4111" } });
        let response = parse(&validate_step("signup", "", &ctx.to_string()));
        assert_eq!(response["valid"], true);

        let ctx = json!({ "step": 1, "values": { "plan": "pro", "card": "4111" } });
        let response = parse(&validate_step("signup", "", &ctx.to_string()));
        assert_eq!(response["valid"], true);

        let ctx = json!({ "step": 0, "values": {} });
        let response = parse(&validate_step("signup", "", &ctx.to_string()));
        assert_eq!(response["valid"], false);
        assert_eq!(response["errors"][0]["field"], "name");
    }

    #[test]
    fn validate_step_rejects_unknown_steps() {
        let response = parse(&validate_step("signup", "", r#"{"step": 9}"#));
        assert_eq!(response["error"], "form 'signup' has no step 9");
    }

    #[test]
    fn evaluate_rule_handles_missing_values() {
        let response = parse(&evaluate_rule("between", "5", "[1, 10]"));
        assert_eq!(response["result"], true);

        let response = parse(&evaluate_rule("notExists", "", "null"));
        assert_eq!(response["result"], true);

        let response = parse(&evaluate_rule("whatever", "1", "2"));
        assert_eq!(response["result"], true);
    }

    #[test]
    fn extract_variables_coerces_types() {
        let definitions = json!([
            { "name": "score", "path": "result.score", "type": "number" },
            { "name": "ok", "path": "result.ok", "type": "boolean" }
        ]);
        let response = parse(&extract_variables(
            r#"{"result":{"score":"10","ok":"yes"}}"#,
            &definitions.to_string(),
        ));
        assert_eq!(response, json!({ "ok": true, "score": 10 }));
    }

    #[test]
    fn extract_paths_walks_objects() {
        let response = parse(&extract_paths(r#"{"a":{"b":1,"c":2}}"#));
        assert_eq!(response, json!(["a", "a.b", "a.c"]));
        let error = parse(&extract_paths("{"));
        assert!(error["error"].is_string());
    }

    #[test]
    fn apply_mapping_returns_operations() {
        let rules = json!([{ "source": "user.age", "target": "age" }]);
        let response = parse(&apply_mapping(r#"{"user":{"age":"30"}}"#, &rules.to_string()));
        assert_eq!(
            response,
            json!([{ "field": "age", "operation": "set", "value": "30" }])
        );
    }

    #[test]
    fn apply_transformations_runs_in_order() {
        let transformations = json!([
            { "field": "total", "type": "calculate", "config": { "formula": "x * 2" } },
            { "field": "total", "type": "format", "config": { "format": "#.##" } }
        ]);
        let response = parse(&apply_transformations(
            r#"{"total":"10"}"#,
            &transformations.to_string(),
        ));
        assert_eq!(response["total"], "20.00");
    }

    #[test]
    fn apply_mask_formats_digits() {
        let response = parse(&apply_mask("cep", "01310100"));
        assert_eq!(response["value"], "01310-100");
    }

    #[test]
    fn resolve_fields_applies_conditional_logic() {
        let ctx = json!({ "step": 2, "values": { "plan": "basic" } });
        let response = parse(&resolve_fields("signup", "", &ctx.to_string()));
        assert_eq!(response["fields"]["f-notes"]["visible"], false);
        assert_eq!(response["hidden"], json!(["notes"]));
    }

    #[test]
    fn render_text_outputs_summary() {
        let output = render_text("signup", "", r#"{"values":{"name":"Ana"}}"#);
        assert!(output.contains("Form: Signup (signup)"));
        assert!(output.contains(" - name (Name) [required] = Ana"));
    }

    #[test]
    fn render_json_ui_reports_step_errors() {
        let ctx = json!({
            "step": 1,
            "values": { "plan": "pro" },
            "errors": [{ "message": "webhook request failed with status 500" }]
        });
        let ui = parse(&render_json_ui("signup", "", &ctx.to_string()));
        assert_eq!(ui["status"], "error");
        assert_eq!(ui["progress"]["step"], 2);
        assert_eq!(ui["errors"][0], "webhook request failed with status 500");
        let fields = ui["fields"].as_array().expect("fields");
        assert_eq!(fields.len(), 2);
    }
}
