use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use form_spec::spec::webhook::HttpMethod;
use form_spec::{
    AsyncOutcome, HttpRequest, HttpResponse, HttpTransport, OrchestratorError, Phase,
    STEP_CHECK_FAILURE_MESSAGE, StepError, StepOrchestrator, SubmissionError, SubmissionHandler,
    SubmitOutcome, TransportError, ValueMap, WebhookError,
};

mod common;

use common::ScriptedTransport;

fn values(pairs: &[(&str, Value)]) -> ValueMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn signup() -> StepOrchestrator {
    StepOrchestrator::new(
        &common::load_form("signup_form"),
        Arc::new(ScriptedTransport::new()),
    )
    .unwrap()
}

fn credit(transport: Arc<dyn HttpTransport>) -> StepOrchestrator {
    StepOrchestrator::new(&common::load_form("webhook_form"), transport).unwrap()
}

fn checked(transport: Arc<ScriptedTransport>) -> StepOrchestrator {
    StepOrchestrator::new(&common::load_form("checked_form"), transport).unwrap()
}

fn lookup_values() -> ValueMap {
    values(&[("cpf", json!("529.982.247-25")), ("cep", json!("01310-100"))])
}

#[derive(Default)]
struct RecordingSubmission {
    received: Mutex<Vec<ValueMap>>,
    reject: bool,
}

#[async_trait]
impl SubmissionHandler for RecordingSubmission {
    async fn submit(&self, values: &ValueMap) -> Result<(), SubmissionError> {
        self.received.lock().unwrap().push(values.clone());
        if self.reject {
            return Err(SubmissionError::Rejected { status: 422 });
        }
        Ok(())
    }
}

/// Delays every answer so a test can act while a request is in flight.
struct SlowTransport {
    inner: ScriptedTransport,
}

#[async_trait]
impl HttpTransport for SlowTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.send(request).await
    }
}

#[test]
fn starts_idle_on_the_first_step() {
    let orchestrator = signup();
    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.phase, Phase::Idle);
    assert_eq!(snapshot.current_step_index, 0);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.field_states.len(), 3);
    assert!(snapshot.field_states["f-plan"].required);
}

#[test]
fn rejects_structurally_broken_forms() {
    let mut form = common::load_form("signup_form");
    form.steps[1].order = 5;
    assert!(StepOrchestrator::new(&form, Arc::new(ScriptedTransport::new())).is_err());
}

#[tokio::test]
async fn invalid_submission_keeps_the_step() {
    let orchestrator = signup();
    let outcome = orchestrator
        .submit(values(&[("email", json!("nope"))]))
        .await
        .unwrap();

    let SubmitOutcome::Invalid { errors } = outcome else {
        panic!("expected validation errors, got {outcome:?}");
    };
    let fields: Vec<_> = errors.iter().filter_map(|error| error.field.as_deref()).collect();
    assert_eq!(fields, vec!["name", "email", "plan"]);
    assert_eq!(orchestrator.current_step_index(), 0);
    assert_eq!(orchestrator.phase(), Phase::Idle);
    assert_eq!(orchestrator.errors(), errors);
}

#[tokio::test]
async fn skip_rule_jumps_two_steps() {
    let orchestrator = signup();
    let outcome = orchestrator
        .submit(values(&[("name", json!("Ana")), ("plan", json!("basic"))]))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Advanced {
            from: 0,
            to: 2,
            skipped: true
        }
    );
    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.current_step_index, 2);
    assert!(snapshot.field_states["f-terms"].visible);
    assert!(!snapshot.field_states["f-notes"].visible);
}

#[tokio::test]
async fn step_rules_and_field_logic_shape_the_next_step() {
    let orchestrator = signup();
    orchestrator
        .submit(values(&[("name", json!("Ana")), ("plan", json!("pro"))]))
        .await
        .unwrap();

    let states = orchestrator.field_states();
    assert!(states["f-company"].visible);
    assert!(states["f-company"].required);

    let outcome = orchestrator.submit(ValueMap::new()).await.unwrap();
    let SubmitOutcome::Invalid { errors } = outcome else {
        panic!("expected validation errors, got {outcome:?}");
    };
    let fields: Vec<_> = errors.iter().filter_map(|error| error.field.as_deref()).collect();
    assert_eq!(fields, vec!["card", "company"]);
}

#[tokio::test]
async fn previous_step_reuses_states_and_resubmits_the_same_way() {
    let orchestrator = signup();
    let submitted = values(&[("name", json!("Ana")), ("plan", json!("pro"))]);
    let first_step_states = orchestrator.field_states();

    orchestrator.submit(submitted.clone()).await.unwrap();
    let billing_states = orchestrator.field_states();

    assert_eq!(orchestrator.previous_step().unwrap(), 0);
    assert_eq!(orchestrator.field_states(), first_step_states);
    assert_eq!(orchestrator.snapshot().values, submitted);

    let outcome = orchestrator.submit(submitted).await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Advanced {
            from: 0,
            to: 1,
            skipped: false
        }
    );
    assert_eq!(orchestrator.field_states(), billing_states);
}

#[test]
fn previous_step_on_the_first_step_fails() {
    assert_eq!(signup().previous_step(), Err(OrchestratorError::NoPreviousStep));
}

#[tokio::test]
async fn last_step_completes_with_merged_values() {
    let handler = Arc::new(RecordingSubmission::default());
    let orchestrator = signup().with_submission_handler(handler.clone());

    orchestrator
        .submit(values(&[("name", json!("Ana")), ("plan", json!("basic"))]))
        .await
        .unwrap();
    let outcome = orchestrator
        .submit(values(&[("terms", json!(true))]))
        .await
        .unwrap();

    let expected = values(&[
        ("name", json!("Ana")),
        ("plan", json!("basic")),
        ("terms", json!(true)),
    ]);
    assert_eq!(outcome, SubmitOutcome::Completed { values: expected.clone() });
    assert_eq!(handler.received.lock().unwrap().clone(), vec![expected]);
    assert_eq!(orchestrator.phase(), Phase::Complete);

    assert_eq!(
        orchestrator.submit(ValueMap::new()).await,
        Err(OrchestratorError::Completed)
    );
    assert_eq!(orchestrator.previous_step(), Err(OrchestratorError::Completed));
}

#[tokio::test]
async fn rejected_submission_moves_to_error_and_can_retry() {
    let handler = Arc::new(RecordingSubmission {
        reject: true,
        ..RecordingSubmission::default()
    });
    let orchestrator = signup().with_submission_handler(handler.clone());
    orchestrator
        .submit(values(&[("name", json!("Ana")), ("plan", json!("basic"))]))
        .await
        .unwrap();

    let result = orchestrator.submit(values(&[("terms", json!(true))])).await;
    assert_eq!(
        result,
        Err(OrchestratorError::Submission(SubmissionError::Rejected { status: 422 }))
    );
    assert_eq!(orchestrator.phase(), Phase::Error);
    assert_eq!(orchestrator.current_step_index(), 2);
    assert_eq!(orchestrator.errors().len(), 1);
    assert!(orchestrator.errors()[0].field.is_none());

    let retry = orchestrator.submit(values(&[("terms", json!(true))])).await;
    assert!(retry.is_err());
    assert_eq!(handler.received.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn webhook_variables_and_mapping_prefill_the_next_step() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(
        200,
        json!({
            "result": { "score": 900, "limit": "5000" },
            "address": { "street": "av paulista", "city": "São Paulo" }
        }),
    );
    let orchestrator = credit(transport.clone());

    let outcome = orchestrator.submit(lookup_values()).await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Advanced {
            from: 0,
            to: 1,
            skipped: false
        }
    );

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.values["street"], json!("AV PAULISTA"));
    assert_eq!(snapshot.values["limit"], json!(5000));
    assert!(snapshot.field_states["f-vip"].visible);

    let sent = transport.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].headers["Authorization"], "Bearer secret-token");
    assert_eq!(sent[0].headers["X-Tenant"], "acme");
    assert_eq!(sent[0].query, vec![("zip".to_string(), "01310-100".to_string())]);
    assert_eq!(
        sent[0].body.as_ref().unwrap()["stepData"]["cpf"],
        json!("529.982.247-25")
    );
}

#[tokio::test]
async fn webhook_conditions_hide_fields_when_they_fail() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, json!({ "result": { "score": 500 } }));
    let orchestrator = credit(transport);

    orchestrator.submit(lookup_values()).await.unwrap();
    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.current_step_index, 1);
    assert!(!snapshot.field_states["f-vip"].visible);
    assert!(!snapshot.values.contains_key("street"));
}

#[tokio::test]
async fn variables_drive_skip_rules() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, json!({ "result": { "score": 120 } }));
    let orchestrator = credit(transport);

    let outcome = orchestrator.submit(lookup_values()).await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Advanced {
            from: 0,
            to: 2,
            skipped: true
        }
    );
}

#[tokio::test]
async fn webhook_failure_keeps_the_step_and_allows_retry() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(500, json!({ "error": "down" }));
    transport.push_json(200, json!({ "result": { "score": 650 } }));
    let orchestrator = credit(transport);

    let result = orchestrator.submit(lookup_values()).await;
    assert_eq!(
        result,
        Err(OrchestratorError::Webhook(WebhookError::WebhookExecutionFailed { status: 500 }))
    );
    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.phase, Phase::Error);
    assert_eq!(snapshot.current_step_index, 0);
    assert_eq!(snapshot.errors.len(), 1);
    assert!(snapshot.errors[0].field.is_none());

    let outcome = orchestrator.submit(lookup_values()).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Advanced { to: 1, .. }));
    assert!(orchestrator.errors().is_empty());
}

#[tokio::test]
async fn concurrent_submit_is_busy() {
    let inner = ScriptedTransport::new();
    inner.push_json(200, json!({ "result": { "score": 650 } }));
    let orchestrator = credit(Arc::new(SlowTransport { inner }));

    let (first, second) = tokio::join!(orchestrator.submit(lookup_values()), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        orchestrator.submit(lookup_values()).await
    });

    assert!(matches!(first, Ok(SubmitOutcome::Advanced { to: 1, .. })));
    assert_eq!(second, Err(OrchestratorError::Busy(Phase::AwaitingWebhook)));
}

#[tokio::test]
async fn reset_cancels_an_in_flight_submit() {
    let inner = ScriptedTransport::new();
    inner.push_json(200, json!({ "result": { "score": 650 } }));
    let orchestrator = credit(Arc::new(SlowTransport { inner }));

    let (outcome, _) = tokio::join!(orchestrator.submit(lookup_values()), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(orchestrator.snapshot().loading);
        orchestrator.reset();
    });

    assert_eq!(outcome, Ok(SubmitOutcome::Cancelled));
    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.phase, Phase::Idle);
    assert_eq!(snapshot.current_step_index, 0);
    assert!(snapshot.values.is_empty());
    assert!(orchestrator.merged_values().is_empty());
}

#[test]
fn set_value_applies_the_field_mask() {
    let orchestrator = credit(Arc::new(ScriptedTransport::new()));
    assert_eq!(
        orchestrator.set_value("cpf", json!("52998224725")).unwrap(),
        json!("529.982.247-25")
    );
    assert_eq!(
        orchestrator.set_value("f-cep", json!("01310100")).unwrap(),
        json!("01310100")
    );
    assert_eq!(orchestrator.snapshot().values["cpf"], json!("529.982.247-25"));
    assert_eq!(
        orchestrator.set_value("street", json!("x")),
        Err(OrchestratorError::UnknownField("street".into()))
    );
}

#[tokio::test]
async fn async_validation_runs_local_rules_first() {
    let transport = Arc::new(ScriptedTransport::new());
    let orchestrator = credit(transport.clone());

    let outcome = orchestrator
        .validate_field_async("cep", json!("123"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        AsyncOutcome::Invalid {
            message: "Invalid CEP".into()
        }
    );
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn async_validation_updates_other_steps() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, json!({ "logradouro": "Avenida Paulista" }));
    let orchestrator = credit(transport.clone());

    let outcome = orchestrator
        .validate_field_async("cep", json!("01310-100"))
        .await
        .unwrap();
    assert!(matches!(outcome, AsyncOutcome::Valid { .. }));
    assert_eq!(orchestrator.merged_values()["street"], json!("Avenida Paulista"));
    assert!(!orchestrator.snapshot().values.contains_key("street"));

    let sent = &transport.requests()[0];
    assert_eq!(sent.query, vec![("cep".to_string(), "01310-100".to_string())]);
}

#[tokio::test]
async fn async_failure_blocks_submit_until_the_value_changes() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(503, json!({}));
    transport.push_json(200, json!({ "result": { "score": 650 } }));
    let orchestrator = credit(transport);

    orchestrator
        .validate_field_async("cep", json!("01310-100"))
        .await
        .unwrap();

    let outcome = orchestrator.submit(lookup_values()).await.unwrap();
    let SubmitOutcome::Invalid { errors } = outcome else {
        panic!("expected validation errors, got {outcome:?}");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field.as_deref(), Some("cep"));
    assert_eq!(errors[0].message, "Validation failed");

    orchestrator.set_value("cep", json!("01310-100")).unwrap();
    let outcome = orchestrator.submit(lookup_values()).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Advanced { to: 1, .. }));
}

#[tokio::test]
async fn newer_local_failure_supersedes_an_in_flight_lookup() {
    let inner = ScriptedTransport::new();
    inner.push_json(200, json!({ "logradouro": "Stale Street" }));
    let orchestrator = credit(Arc::new(SlowTransport { inner }));

    let (older, newer) = tokio::join!(
        orchestrator.validate_field_async("cep", json!("01310-100")),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            orchestrator.validate_field_async("cep", json!("123")).await
        }
    );

    assert_eq!(older, Ok(AsyncOutcome::Superseded));
    assert_eq!(
        newer,
        Ok(AsyncOutcome::Invalid {
            message: "Invalid CEP".into()
        })
    );
    assert!(!orchestrator.merged_values().contains_key("street"));

    let bad_cep = values(&[("cpf", json!("529.982.247-25")), ("cep", json!("123"))]);
    let outcome = orchestrator.submit(bad_cep).await.unwrap();
    let SubmitOutcome::Invalid { errors } = outcome else {
        panic!("expected validation errors, got {outcome:?}");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field.as_deref(), Some("cep"));
    assert_eq!(errors[0].message, "Invalid CEP");
}

#[tokio::test]
async fn local_failure_blocks_submit_until_the_value_changes() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, json!({ "result": { "score": 650 } }));
    let orchestrator = credit(transport);

    orchestrator
        .validate_field_async("cep", json!("123"))
        .await
        .unwrap();
    let outcome = orchestrator.submit(lookup_values()).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Invalid { .. }));

    orchestrator.set_value("cep", json!("01310-100")).unwrap();
    let outcome = orchestrator.submit(lookup_values()).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Advanced { to: 1, .. }));
}

#[tokio::test]
async fn rules_after_the_first_matching_skip_are_ignored() {
    let orchestrator = StepOrchestrator::new(
        &common::load_form("routing_form"),
        Arc::new(ScriptedTransport::new()),
    )
    .unwrap();

    let outcome = orchestrator
        .submit(values(&[("plan", json!("basic"))]))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Advanced {
            from: 0,
            to: 2,
            skipped: true
        }
    );
    let notes = &orchestrator.field_states()["f-notes"];
    assert!(notes.required);
    assert!(notes.visible);
}

#[tokio::test]
async fn every_matching_rule_applies_when_nothing_skips() {
    let orchestrator = StepOrchestrator::new(
        &common::load_form("routing_form"),
        Arc::new(ScriptedTransport::new()),
    )
    .unwrap();

    orchestrator
        .submit(values(&[("plan", json!("pro"))]))
        .await
        .unwrap();

    assert_eq!(orchestrator.current_step_index(), 1);
    assert!(!orchestrator.field_states()["f-extra"].visible);
    assert!(orchestrator.field_states()["f-seats"].visible);
}

#[tokio::test]
async fn step_check_errors_keep_the_step() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, json!({ "errors": ["Document already registered"] }));
    let orchestrator = checked(transport.clone());

    let outcome = orchestrator
        .submit(values(&[("document", json!("123"))]))
        .await
        .unwrap();

    let expected = vec![StepError::step("Document already registered")];
    assert_eq!(
        outcome,
        SubmitOutcome::Invalid {
            errors: expected.clone()
        }
    );
    assert_eq!(orchestrator.current_step_index(), 0);
    assert_eq!(orchestrator.phase(), Phase::Idle);
    assert_eq!(orchestrator.errors(), expected);

    let sent = transport.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, HttpMethod::Post);
    assert_eq!(sent[0].url, "http://checks.test/account");
    assert_eq!(
        sent[0].body,
        Some(json!({ "currentStep": { "document": "123" }, "previousData": {} }))
    );
}

#[tokio::test]
async fn step_check_is_skipped_when_fields_fail() {
    let transport = Arc::new(ScriptedTransport::new());
    let orchestrator = checked(transport.clone());

    let outcome = orchestrator.submit(ValueMap::new()).await.unwrap();

    assert!(matches!(outcome, SubmitOutcome::Invalid { .. }));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn step_check_payload_drives_the_next_step() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, json!({ "payload": { "risk": "high", "tier": "gold" } }));
    let orchestrator = checked(transport);

    let outcome = orchestrator
        .submit(values(&[("document", json!("123"))]))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Advanced {
            from: 0,
            to: 1,
            skipped: false
        }
    );
    let states = orchestrator.field_states();
    assert!(!states["f-card"].visible);
    assert!(states["f-tier"].visible);
    assert_eq!(orchestrator.merged_values()["tier"], json!("gold"));
}

#[tokio::test]
async fn step_check_payload_can_skip() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, json!({ "payload": { "fastTrack": true } }));
    let orchestrator = checked(transport);

    let outcome = orchestrator
        .submit(values(&[("document", json!("123"))]))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Advanced {
            from: 0,
            to: 2,
            skipped: true
        }
    );
}

#[tokio::test]
async fn failed_step_check_can_be_retried() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(500, json!({ "message": "down" }));
    transport.push_json(200, json!({}));
    let orchestrator = checked(transport);
    let submitted = values(&[("document", json!("123"))]);

    let outcome = orchestrator.submit(submitted.clone()).await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Invalid {
            errors: vec![StepError::step(STEP_CHECK_FAILURE_MESSAGE)]
        }
    );
    assert_eq!(orchestrator.phase(), Phase::Idle);

    let outcome = orchestrator.submit(submitted).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Advanced { to: 1, .. }));
}

#[tokio::test]
async fn get_step_check_sends_earlier_values_as_query() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, json!({}));
    transport.push_json(200, json!({}));
    let orchestrator = checked(transport.clone());

    orchestrator
        .submit(values(&[("document", json!("123"))]))
        .await
        .unwrap();
    orchestrator
        .submit(values(&[("card", json!("4111"))]))
        .await
        .unwrap();

    let sent = &transport.requests()[1];
    assert_eq!(sent.method, HttpMethod::Get);
    assert!(sent.body.is_none());
    let query: BTreeMap<_, _> = sent.query.iter().cloned().collect();
    assert_eq!(query["currentStep"], r#"{"card":"4111"}"#);
    assert_eq!(query["previousData"], r#"{"document":"123"}"#);
    assert_eq!(query["payloadFields"], r#"{"document":"123"}"#);
}

#[tokio::test]
async fn reset_during_step_check_cancels_the_submit() {
    let inner = ScriptedTransport::new();
    inner.push_json(200, json!({}));
    let orchestrator = StepOrchestrator::new(
        &common::load_form("checked_form"),
        Arc::new(SlowTransport { inner }),
    )
    .unwrap();

    let (outcome, ()) = tokio::join!(
        orchestrator.submit(values(&[("document", json!("123"))])),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            orchestrator.reset();
        }
    );

    assert_eq!(outcome, Ok(SubmitOutcome::Cancelled));
    assert_eq!(orchestrator.current_step_index(), 0);
    assert!(orchestrator.merged_values().is_empty());
}
