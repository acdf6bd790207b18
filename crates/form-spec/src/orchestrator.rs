use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use thiserror::Error;

use crate::async_validate::{AsyncOutcome, AsyncValidator};
use crate::mapping::{apply_mapping, apply_transformations};
use crate::mask::apply_mask;
use crate::rules::evaluate_path;
use crate::session::{Phase, SessionSnapshot, SessionState, ValueMap};
use crate::spec::form::{FormDefinition, SpecError};
use crate::spec::step::{StepAction, StepDefinition, StepRule};
use crate::step_validate::{StepCheck, StepValidator};
use crate::submission::{SubmissionError, SubmissionHandler};
use crate::transport::HttpTransport;
use crate::validate::{StepError, validate_field, validate_step};
use crate::variables::extract_variables;
use crate::visibility::{FieldStateMap, resolve_field_states};
use crate::webhook::{WebhookError, WebhookExecutor, WebhookResponse, build_payload};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("a submission is already in progress ({0:?})")]
    Busy(Phase),
    #[error("the form is already complete")]
    Completed,
    #[error("already on the first step")]
    NoPreviousStep,
    #[error("field '{0}' is not part of the current step")]
    UnknownField(String),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// Result of a `submit` call that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Validation failed; the step index is unchanged.
    Invalid { errors: Vec<StepError> },
    Advanced { from: usize, to: usize, skipped: bool },
    Completed { values: ValueMap },
    /// The session was reset while the submission was in flight.
    Cancelled,
}

/// Drives one form session through its steps.
///
/// All work for a session is serialized: a `submit` while another is in
/// flight is rejected with [`OrchestratorError::Busy`]. The state lock is
/// never held across a network call.
pub struct StepOrchestrator {
    form: FormDefinition,
    webhooks: WebhookExecutor,
    validator: AsyncValidator,
    step_checks: StepValidator,
    submission: Option<Arc<dyn SubmissionHandler>>,
    state: Mutex<SessionState>,
}

impl StepOrchestrator {
    pub fn new(form: &FormDefinition, transport: Arc<dyn HttpTransport>) -> Result<Self, SpecError> {
        form.check()?;
        let orchestrator = Self {
            form: form.ordered(),
            webhooks: WebhookExecutor::new(Arc::clone(&transport)),
            validator: AsyncValidator::new(Arc::clone(&transport)),
            step_checks: StepValidator::new(transport),
            submission: None,
            state: Mutex::new(SessionState::new()),
        };
        orchestrator.enter_initial_step();
        Ok(orchestrator)
    }

    pub fn with_submission_handler(mut self, handler: Arc<dyn SubmissionHandler>) -> Self {
        self.submission = Some(handler);
        self
    }

    pub fn form(&self) -> &FormDefinition {
        &self.form
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state().snapshot()
    }

    pub fn current_step_index(&self) -> usize {
        self.state().current
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    pub fn errors(&self) -> Vec<StepError> {
        self.state().errors.clone()
    }

    pub fn field_states(&self) -> FieldStateMap {
        self.state().snapshot().field_states
    }

    pub fn merged_values(&self) -> ValueMap {
        self.state().merged_values()
    }

    pub fn current_step(&self) -> Option<&StepDefinition> {
        self.form.steps.get(self.current_step_index())
    }

    fn enter_initial_step(&self) {
        let mut state = self.state();
        self.enter_step(&mut state, 0, &[]);
    }

    /// Derives fresh field states for `index` and applies their side effects
    /// on stored values: `populate` writes and clearing of hidden fields.
    /// `rules` are the submitted step's rules that still apply.
    fn enter_step(&self, state: &mut SessionState, index: usize, rules: &[StepRule]) {
        let Some(step) = self.form.steps.get(index) else {
            return;
        };
        let resolution =
            resolve_field_states(step, &state.context(), &state.merged_variables(), rules);

        let values = state.values_mut(index);
        values.extend(resolution.populate);
        for name in &resolution.hidden {
            values.remove(name);
        }
        for name in &resolution.hidden {
            state.async_errors.remove(name);
        }

        state.field_states.insert(index, resolution.states);
        state.current = index;
        state.phase = Phase::Idle;
        tracing::debug!(step = index, "entered step");
    }

    /// Submits the current step's values.
    ///
    /// Validation failures, including a refused remote step check, come back
    /// as [`SubmitOutcome::Invalid`]. Webhook
    /// and submission failures move the session to [`Phase::Error`] with the
    /// step index unchanged; submitting again retries.
    pub async fn submit(&self, values: ValueMap) -> Result<SubmitOutcome, OrchestratorError> {
        let (index, generation) = {
            let mut state = self.state();
            if state.phase == Phase::Complete {
                return Err(OrchestratorError::Completed);
            }
            if !state.phase.accepts_submit() {
                return Err(OrchestratorError::Busy(state.phase));
            }
            state.phase = Phase::Validating;
            state.errors.clear();
            tracing::debug!(step = state.current, "validating step");
            (state.current, state.generation)
        };

        let Some(step) = self.form.steps.get(index) else {
            let mut state = self.state();
            state.phase = Phase::Idle;
            return Err(OrchestratorError::Completed);
        };

        let errors = {
            let mut state = self.state();
            let cached = state.field_states.get(&index).cloned();
            let states = match cached {
                Some(states) => states,
                None => {
                    let resolution = resolve_field_states(
                        step,
                        &state.context(),
                        &state.merged_variables(),
                        &[],
                    );
                    state.field_states.insert(index, resolution.states.clone());
                    resolution.states
                }
            };
            let mut errors = validate_step(step, &values, &states);
            for field in &step.fields {
                let visible = states.get(&field.id).is_none_or(|field_state| field_state.visible);
                let reported = errors
                    .iter()
                    .any(|error| error.field.as_deref() == Some(field.name.as_str()));
                if visible
                    && !reported
                    && let Some(message) = state.async_errors.get(&field.name)
                {
                    errors.push(StepError::field(field.name.clone(), message.clone()));
                }
            }
            if !errors.is_empty() {
                state.phase = Phase::Idle;
                state.errors = errors.clone();
                tracing::debug!(step = index, errors = errors.len(), "step validation failed");
            }
            errors
        };
        if !errors.is_empty() {
            return Ok(SubmitOutcome::Invalid { errors });
        }

        let checked = match step.remote_check() {
            Some(logic) => {
                let previous = self.state().values_before(index);
                let check = self.step_checks.check(logic, &values, &previous).await;

                let mut state = self.state();
                if state.generation != generation {
                    tracing::debug!(step = index, "step check result ignored after reset");
                    return Ok(SubmitOutcome::Cancelled);
                }
                match check {
                    StepCheck::Passed { payload, updates } => Some((payload, updates)),
                    StepCheck::Failed { errors } => {
                        let errors: Vec<StepError> =
                            errors.into_iter().map(StepError::step).collect();
                        state.phase = Phase::Idle;
                        state.errors = errors.clone();
                        tracing::debug!(step = index, errors = errors.len(), "step check failed");
                        return Ok(SubmitOutcome::Invalid { errors });
                    }
                }
            }
            None => None,
        };

        let response = match step.active_webhook() {
            Some(definition) => {
                let payload = {
                    let mut state = self.state();
                    state.phase = Phase::AwaitingWebhook;
                    build_payload(definition, step, &values, &state.values_before(index))
                };
                let result = self.webhooks.execute(definition, &payload).await;

                let mut state = self.state();
                if state.generation != generation {
                    tracing::debug!(step = index, "webhook result ignored after reset");
                    return Ok(SubmitOutcome::Cancelled);
                }
                match result {
                    Ok(response) => Some(response),
                    Err(error) => {
                        tracing::warn!(step = index, %error, "step webhook failed");
                        state.phase = Phase::Error;
                        state.errors.push(StepError::step(error.to_string()));
                        return Err(error.into());
                    }
                }
            }
            None => None,
        };

        let merged = {
            let mut state = self.state();
            if state.generation != generation {
                return Ok(SubmitOutcome::Cancelled);
            }
            state.phase = Phase::Evaluating;
            state.values_mut(index).extend(values);
            let mut variables = ValueMap::new();
            if let Some(response) = &response {
                variables = extract_variables(&response.data, &step.variables);
                self.apply_data_mapping(&mut state, step, response);
            }
            if let Some((payload, updates)) = &checked {
                variables.extend(payload.iter().map(|(key, value)| (key.clone(), value.clone())));
                self.apply_check_updates(&mut state, index, updates);
            }
            if response.is_some() || checked.is_some() {
                state.variables.insert(index, variables);
            }

            let last = self.form.last_step_index();
            if index < last {
                let context = state.context();
                // Rules after the first matching skip are not evaluated.
                let rules = step.rules();
                let skip_at = rules.iter().position(|rule| {
                    rule.action == StepAction::Skip
                        && evaluate_path(&context, &rule.field, &rule.operator, &rule.value)
                });
                let skipped = skip_at.is_some();
                let next = if skipped {
                    (index + 2).min(last)
                } else {
                    index + 1
                };

                self.enter_step(&mut state, next, &rules[..skip_at.unwrap_or(rules.len())]);
                tracing::debug!(from = index, to = next, skipped, "step advanced");
                return Ok(SubmitOutcome::Advanced {
                    from: index,
                    to: next,
                    skipped,
                });
            }
            state.merged_values()
        };

        self.complete(merged, index, generation).await
    }

    async fn complete(
        &self,
        values: ValueMap,
        index: usize,
        generation: u64,
    ) -> Result<SubmitOutcome, OrchestratorError> {
        let result = match &self.submission {
            Some(handler) => handler.submit(&values).await,
            None => Ok(()),
        };

        let mut state = self.state();
        if state.generation != generation {
            return Ok(SubmitOutcome::Cancelled);
        }
        match result {
            Ok(()) => {
                state.phase = Phase::Complete;
                tracing::info!(form = %self.form.id, fields = values.len(), "form complete");
                Ok(SubmitOutcome::Completed { values })
            }
            Err(error) => {
                tracing::warn!(step = index, %error, "form submission failed");
                state.phase = Phase::Error;
                state.errors.push(StepError::step(error.to_string()));
                Err(error.into())
            }
        }
    }

    /// Writes the step's data mapping results into the fields they target,
    /// coerced to the target field's type.
    fn apply_data_mapping(
        &self,
        state: &mut SessionState,
        step: &StepDefinition,
        response: &WebhookResponse,
    ) {
        let Some(config) = &step.data_mapping else {
            return;
        };

        let mut mapped: BTreeMap<String, Value> = BTreeMap::new();
        for operation in apply_mapping(&response.data, &config.rules) {
            match self.form.locate_field(&operation.field) {
                Some((_, field)) => {
                    mapped.insert(field.name.clone(), field.kind.coerce(&operation.value));
                }
                None => {
                    tracing::debug!(field = %operation.field, "mapping target is not a form field");
                }
            }
        }
        apply_transformations(&mut mapped, &config.transformations);

        for (name, value) in mapped {
            if let Some((owner, _)) = self.form.locate_field(&name) {
                state.values_mut(owner).insert(name, value);
            }
        }
    }

    /// Writes a passed step check's mapped values, coerced like data mapping
    /// results. Names outside the form land on the checked step.
    fn apply_check_updates(
        &self,
        state: &mut SessionState,
        index: usize,
        updates: &BTreeMap<String, Value>,
    ) {
        for (name, value) in updates {
            match self.form.locate_field(name) {
                Some((owner, field)) => {
                    state
                        .values_mut(owner)
                        .insert(field.name.clone(), field.kind.coerce(value));
                }
                None => {
                    state.values_mut(index).insert(name.clone(), value.clone());
                }
            }
        }
    }

    /// Moves back one step without re-validating. The field states last
    /// derived for that step are reused as they are.
    pub fn previous_step(&self) -> Result<usize, OrchestratorError> {
        let mut state = self.state();
        match state.phase {
            Phase::Idle | Phase::Error => {}
            Phase::Complete => return Err(OrchestratorError::Completed),
            busy => return Err(OrchestratorError::Busy(busy)),
        }
        if state.current == 0 {
            return Err(OrchestratorError::NoPreviousStep);
        }

        let index = state.current - 1;
        state.errors.clear();
        if state.field_states.contains_key(&index) {
            state.current = index;
            state.phase = Phase::Idle;
        } else {
            self.enter_step(&mut state, index, &[]);
        }
        tracing::debug!(step = index, "moved to previous step");
        Ok(index)
    }

    /// Discards in-flight work and returns to `Idle(0)` with no values.
    pub fn reset(&self) {
        self.validator.invalidate_all();
        let mut state = self.state();
        state.reset();
        self.enter_step(&mut state, 0, &[]);
        tracing::debug!(generation = state.generation, "session reset");
    }

    /// Alias of [`StepOrchestrator::reset`].
    pub fn cancel(&self) {
        self.reset();
    }

    /// Records a direct edit on the current step, applying the field's mask
    /// to string input. Returns the stored value.
    pub fn set_value(&self, key: &str, value: Value) -> Result<Value, OrchestratorError> {
        let mut state = self.state();
        let field = self
            .form
            .steps
            .get(state.current)
            .and_then(|step| step.field(key))
            .ok_or_else(|| OrchestratorError::UnknownField(key.to_string()))?;

        let stored = match (field.mask(), &value) {
            (Some(mask), Value::String(text)) => Value::String(apply_mask(mask, text)),
            _ => value,
        };
        state.async_errors.remove(&field.name);
        let current = state.current;
        state
            .values_mut(current)
            .insert(field.name.clone(), stored.clone());
        Ok(stored)
    }

    /// Runs the field's rules and, when they pass, its remote validation.
    ///
    /// Every call supersedes the field's in-flight request, even one that
    /// stops at the local rules. Local and remote failures mark the field
    /// invalid until its value changes; they never fail the call.
    /// Response-mapped values overwrite stored values.
    pub async fn validate_field_async(
        &self,
        key: &str,
        value: Value,
    ) -> Result<AsyncOutcome, OrchestratorError> {
        let (field, form_values, generation) = {
            let mut state = self.state();
            let step = self.form.steps.get(state.current);
            let field = step
                .and_then(|step| step.field(key))
                .ok_or_else(|| OrchestratorError::UnknownField(key.to_string()))?;
            let required = state
                .field_states
                .get(&state.current)
                .and_then(|states| states.get(&field.id))
                .map_or(field.required, |field_state| field_state.required);

            self.validator.supersede(&field.name);
            let local = validate_field(field, &value, required);
            if let Some(message) = local.errors.into_iter().next() {
                state
                    .async_errors
                    .insert(field.name.clone(), message.clone());
                return Ok(AsyncOutcome::Invalid { message });
            }

            let mut form_values = state.merged_values();
            form_values.extend(state.current_values());
            (field, form_values, state.generation)
        };

        let outcome = self.validator.validate(field, &value, &form_values).await;

        let mut state = self.state();
        if state.generation != generation {
            return Ok(AsyncOutcome::Superseded);
        }
        match &outcome {
            AsyncOutcome::Valid { updates } => {
                state.async_errors.remove(&field.name);
                let current = state.current;
                for (name, mapped) in updates {
                    let owner = self
                        .form
                        .locate_field(name)
                        .map_or(current, |(owner, _)| owner);
                    state.values_mut(owner).insert(name.clone(), mapped.clone());
                }
            }
            AsyncOutcome::Invalid { message } => {
                state.async_errors.insert(field.name.clone(), message.clone());
            }
            AsyncOutcome::Superseded => {}
        }
        Ok(outcome)
    }
}
