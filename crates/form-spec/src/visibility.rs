use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::path;
use crate::rules::evaluate_path;
use crate::spec::field::{FieldAction, FieldDefinition, FieldRuntimeState};
use crate::spec::step::{StepAction, StepDefinition, StepRule};

/// Runtime states keyed by field id.
pub type FieldStateMap = BTreeMap<String, FieldRuntimeState>;

/// Everything derived for one step render.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldResolution {
    pub states: FieldStateMap,
    /// Values written by `populate`, keyed by field name.
    pub populate: BTreeMap<String, Value>,
    /// Names of fields that ended up hidden; their values are cleared.
    pub hidden: Vec<String>,
}

/// Derives fresh states for every field of `step`.
///
/// Layers, in order: definition defaults, the field's own conditional logic
/// against `context`, its webhook conditions against `variables`, then the
/// `show`/`hide`/`require` step rules in `step_rules` that hold for their
/// target fields.
pub fn resolve_field_states(
    step: &StepDefinition,
    context: &Map<String, Value>,
    variables: &Map<String, Value>,
    step_rules: &[StepRule],
) -> FieldResolution {
    let mut resolution = FieldResolution::default();

    for field in &step.fields {
        let mut state = FieldRuntimeState::from_definition(field);

        if let Some(logic) = &field.conditional_logic {
            let holds = logic.conditions.iter().all(|condition| {
                evaluate_path(context, &condition.field, &condition.operator, &condition.value)
            });
            apply_field_action(&mut state, logic.action, holds);
            if holds && logic.action == FieldAction::Populate {
                let value = logic.value.clone().or_else(|| {
                    logic
                        .conditions
                        .first()
                        .and_then(|condition| path::resolve_in(context, &condition.field))
                        .cloned()
                });
                if let Some(value) = value {
                    resolution.populate.insert(field.name.clone(), value);
                }
            }
        }

        apply_webhook_conditions(field, variables, &mut state);

        resolution.states.insert(field.id.clone(), state);
    }

    for rule in step_rules {
        if rule.target_fields.is_empty() || rule.action == StepAction::Skip {
            continue;
        }
        if !evaluate_path(context, &rule.field, &rule.operator, &rule.value) {
            continue;
        }
        for target in &rule.target_fields {
            let Some(field) = step.field(target) else {
                continue;
            };
            let Some(state) = resolution.states.get_mut(&field.id) else {
                continue;
            };
            match rule.action {
                StepAction::Show => state.visible = true,
                StepAction::Hide => state.visible = false,
                StepAction::Require => state.required = true,
                StepAction::Skip => {}
            }
        }
    }

    resolution.hidden = step
        .fields
        .iter()
        .filter(|field| {
            resolution
                .states
                .get(&field.id)
                .is_some_and(|state| !state.visible)
        })
        .map(|field| field.name.clone())
        .collect();

    resolution
}

/// Conditions sharing an action are ANDed; the action applies when they hold.
fn apply_webhook_conditions(
    field: &FieldDefinition,
    variables: &Map<String, Value>,
    state: &mut FieldRuntimeState,
) {
    let mut groups: Vec<(FieldAction, bool)> = Vec::new();
    for condition in &field.webhook_conditions {
        let holds = evaluate_path(
            variables,
            &condition.variable_path,
            &condition.operator,
            &condition.value,
        );
        match groups.iter_mut().find(|(action, _)| *action == condition.action) {
            Some((_, all)) => *all &= holds,
            None => groups.push((condition.action, holds)),
        }
    }
    for (action, holds) in groups {
        apply_field_action(state, action, holds);
    }
}

fn apply_field_action(state: &mut FieldRuntimeState, action: FieldAction, holds: bool) {
    match action {
        FieldAction::Show if !holds => state.visible = false,
        FieldAction::Hide if holds => state.visible = false,
        FieldAction::Require if holds => state.required = true,
        FieldAction::Optional if holds => state.required = false,
        FieldAction::Disable if holds => state.disabled = true,
        FieldAction::Enable if holds => state.disabled = false,
        _ => {}
    }
}
