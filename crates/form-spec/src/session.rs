//! Per-session state owned by one orchestrator. Nothing here is shared across
//! sessions and nothing performs I/O.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::validate::StepError;
use crate::visibility::FieldStateMap;

pub type ValueMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Idle,
    Validating,
    AwaitingWebhook,
    Evaluating,
    Complete,
    Error,
}

impl Phase {
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Phase::Validating | Phase::AwaitingWebhook | Phase::Evaluating
        )
    }

    pub fn accepts_submit(&self) -> bool {
        matches!(self, Phase::Idle | Phase::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub phase: Phase,
    pub current: usize,
    /// Values keyed by step index, then field name.
    pub step_values: BTreeMap<usize, ValueMap>,
    /// Variables from each step's last webhook response.
    pub variables: BTreeMap<usize, ValueMap>,
    /// Last derived field states per step index.
    pub field_states: BTreeMap<usize, FieldStateMap>,
    pub errors: Vec<StepError>,
    /// Remote validation failures keyed by field name.
    pub async_errors: BTreeMap<String, String>,
    /// Bumped on reset; in-flight work started under an older value is ignored.
    pub generation: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// All step values merged in ascending step order; later steps win.
    pub fn merged_values(&self) -> ValueMap {
        self.step_values
            .values()
            .flat_map(|values| values.iter())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Values of the steps strictly before `index`, merged in order.
    pub fn values_before(&self, index: usize) -> ValueMap {
        self.step_values
            .range(..index)
            .flat_map(|(_, values)| values.iter())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn merged_variables(&self) -> Map<String, Value> {
        self.variables
            .values()
            .flat_map(|values| values.iter())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Condition context: merged values with variables layered on top.
    pub fn context(&self) -> Map<String, Value> {
        let mut context: Map<String, Value> = self.merged_values().into_iter().collect();
        context.extend(self.merged_variables());
        context
    }

    pub fn current_values(&self) -> ValueMap {
        self.step_values
            .get(&self.current)
            .cloned()
            .unwrap_or_default()
    }

    pub fn values_mut(&mut self, index: usize) -> &mut ValueMap {
        self.step_values.entry(index).or_default()
    }

    /// Back to `Idle(0)` with nothing recorded; bumps the generation.
    pub fn reset(&mut self) {
        let generation = self.generation.wrapping_add(1);
        *self = Self {
            generation,
            ..Self::default()
        };
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            current_step_index: self.current,
            loading: self.phase.is_busy(),
            field_states: self
                .field_states
                .get(&self.current)
                .cloned()
                .unwrap_or_default(),
            values: self.current_values(),
            errors: self.errors.clone(),
        }
    }
}

/// What a UI reads after each transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub current_step_index: usize,
    pub loading: bool,
    pub field_states: FieldStateMap,
    pub values: ValueMap,
    pub errors: Vec<StepError>,
}
