use std::sync::Arc;

use serde_json::json;

use form_spec::render::value_to_display;
use form_spec::{
    RenderStatus, StepOrchestrator, SubmitOutcome, ValueMap, build_render_payload, render_json_ui,
    render_text,
};

mod common;

fn signup() -> StepOrchestrator {
    StepOrchestrator::new(
        &common::load_form("signup_form"),
        Arc::new(common::ScriptedTransport::new()),
    )
    .expect("valid form")
}

fn answers(pairs: &[(&str, &str)]) -> ValueMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), json!(value)))
        .collect()
}

#[test]
fn render_text_lists_the_current_step() {
    let orchestrator = signup();
    let payload = build_render_payload(orchestrator.form(), &orchestrator.snapshot());

    assert_eq!(payload.status, RenderStatus::NeedInput);
    assert_eq!(payload.progress.step, 1);
    assert_eq!(payload.progress.total, 3);
    assert_eq!(payload.submit_label, "Next");

    let text = render_text(&payload);
    assert!(text.contains("Form: Signup (signup)"));
    assert!(text.contains("Status: need_input (step 1/3)"));
    assert!(text.contains("Step: Account"));
    assert!(text.contains(" - name (Name) [required]"));
    assert!(text.contains(" - email (Email)"));
}

#[tokio::test]
async fn render_text_shows_field_errors() {
    let orchestrator = signup();
    let outcome = orchestrator
        .submit(answers(&[("email", "bad")]))
        .await
        .expect("submit");
    assert!(matches!(outcome, SubmitOutcome::Invalid { .. }));

    let payload = build_render_payload(orchestrator.form(), &orchestrator.snapshot());
    let name = payload
        .fields
        .iter()
        .find(|field| field.name == "name")
        .expect("name field");
    assert_eq!(name.errors, vec!["This field is required"]);

    let text = render_text(&payload);
    assert!(text.contains("     ! Invalid email"));
}

#[tokio::test]
async fn render_json_ui_leaves_hidden_fields_out() {
    let orchestrator = signup();
    orchestrator
        .submit(answers(&[("name", "Ana"), ("plan", "basic")]))
        .await
        .expect("submit");

    let payload = build_render_payload(orchestrator.form(), &orchestrator.snapshot());
    assert_eq!(payload.submit_label, "Create account");

    let ui = render_json_ui(&payload);
    assert_eq!(ui["formId"], "signup");
    assert_eq!(ui["status"], "need_input");
    assert_eq!(ui["step"]["id"], "confirm");
    assert_eq!(ui["progress"]["step"], 3);
    assert_eq!(ui["submitLabel"], "Create account");

    let fields = ui["fields"].as_array().expect("fields array");
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0]["name"], "terms");
    assert_eq!(fields[0]["type"], "checkbox");
    assert_eq!(fields[0]["required"], true);
}

#[test]
fn render_json_ui_exposes_options_and_values() {
    let orchestrator = signup();
    orchestrator
        .set_value("plan", json!("pro"))
        .expect("plan is on the first step");

    let ui = render_json_ui(&build_render_payload(
        orchestrator.form(),
        &orchestrator.snapshot(),
    ));
    let plan = ui["fields"]
        .as_array()
        .expect("fields array")
        .iter()
        .find(|field| field["name"] == "plan")
        .expect("plan field")
        .clone();
    assert_eq!(plan["value"], "pro");
    assert_eq!(plan["options"][1], json!({ "label": "Pro", "value": "pro" }));
    assert_eq!(ui["errors"], json!([]));
}

#[tokio::test]
async fn completed_sessions_render_as_complete() {
    let orchestrator = signup();
    orchestrator
        .submit(answers(&[("name", "Ana"), ("plan", "basic")]))
        .await
        .expect("first step");
    orchestrator
        .submit(ValueMap::from([("terms".to_string(), json!(true))]))
        .await
        .expect("last step");

    let payload = build_render_payload(orchestrator.form(), &orchestrator.snapshot());
    assert_eq!(payload.status, RenderStatus::Complete);
    let text = render_text(&payload);
    assert!(text.ends_with("All steps are submitted."));
}

#[test]
fn display_values() {
    assert_eq!(value_to_display(&json!("x")), "x");
    assert_eq!(value_to_display(&json!(true)), "true");
    assert_eq!(value_to_display(&json!(2.5)), "2.5");
    assert_eq!(value_to_display(&json!(["a"])), "[\"a\"]");
}
