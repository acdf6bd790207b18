use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::spec::field::FieldDefinition;
use crate::spec::step::StepDefinition;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("form '{0}' has no steps")]
    NoSteps(String),
    #[error("step order {0} is used more than once")]
    DuplicateOrder(usize),
    #[error("step orders must be contiguous from 0; expected {expected}, found {found}")]
    OrderGap { expected: usize, found: usize },
    #[error("step '{step}' declares field id '{field}' more than once")]
    DuplicateField { step: String, field: String },
    #[error("step '{step}' has a field with an empty name")]
    EmptyFieldName { step: String },
}

/// Top-level multi-step form definition, supplied read-only by storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FormDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_label: Option<String>,
    /// Receives the merged values when the last step completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub steps: Vec<StepDefinition>,
}

impl FormDefinition {
    /// Structural checks the engine relies on.
    pub fn check(&self) -> Result<(), SpecError> {
        if self.steps.is_empty() {
            return Err(SpecError::NoSteps(self.id.clone()));
        }

        let mut orders = BTreeSet::new();
        for step in &self.steps {
            if !orders.insert(step.order) {
                return Err(SpecError::DuplicateOrder(step.order));
            }

            let mut ids = BTreeSet::new();
            for field in &step.fields {
                if field.name.trim().is_empty() {
                    return Err(SpecError::EmptyFieldName {
                        step: step.id.clone(),
                    });
                }
                if !ids.insert(field.id.as_str()) {
                    return Err(SpecError::DuplicateField {
                        step: step.id.clone(),
                        field: field.id.clone(),
                    });
                }
            }
        }

        for (expected, found) in orders.into_iter().enumerate() {
            if expected != found {
                return Err(SpecError::OrderGap { expected, found });
            }
        }

        Ok(())
    }

    /// Copy with steps sorted by `order` and each step's fields sorted by `order`.
    pub fn ordered(&self) -> FormDefinition {
        let mut form = self.clone();
        form.steps.sort_by_key(|step| step.order);
        for step in &mut form.steps {
            step.fields.sort_by_key(|field| field.order);
        }
        form
    }

    pub fn last_step_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    /// Finds a field anywhere in the form by id or name, with its step index.
    pub fn locate_field(&self, key: &str) -> Option<(usize, &FieldDefinition)> {
        self.steps.iter().enumerate().find_map(|(index, step)| {
            step.fields
                .iter()
                .find(|field| field.matches_key(key))
                .map(|field| (index, field))
        })
    }
}

/// JSON Schema describing [`FormDefinition`].
pub fn form_schema() -> Value {
    let schema = schemars::schema_for!(FormDefinition);
    serde_json::to_value(schema).unwrap_or(Value::Null)
}
