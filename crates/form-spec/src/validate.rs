use std::collections::BTreeMap;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce;
use crate::expr::Expression;
use crate::spec::field::{FieldDefinition, FieldRuntimeState, ValidationRule, ValidationRuleType};
use crate::spec::step::StepDefinition;

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// An error surfaced to the caller; `field` is absent for step-level failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl StepError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn step(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

/// Runs `rules` in declaration order and collects the messages of the ones
/// that fail. Only `required` looks at empty values; every other rule
/// accepts them.
pub fn validate_sync(value: &Value, rules: &[ValidationRule]) -> FieldValidation {
    let text = coerce::as_text(value);
    let errors: Vec<String> = rules
        .iter()
        .filter(|rule| !check_rule(value, &text, rule))
        .map(|rule| rule.message().to_string())
        .collect();

    FieldValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

fn check_rule(value: &Value, text: &str, rule: &ValidationRule) -> bool {
    if text.is_empty() && rule.kind != ValidationRuleType::Required {
        return true;
    }

    match rule.kind {
        ValidationRuleType::Required => !text.trim().is_empty(),
        ValidationRuleType::Email => is_valid_email(text),
        ValidationRuleType::MinLength => {
            let min = rule.value.as_ref().and_then(Value::as_f64).unwrap_or(0.0);
            text.chars().count() as f64 >= min
        }
        ValidationRuleType::MaxLength => match rule.value.as_ref().and_then(Value::as_f64) {
            Some(max) => text.chars().count() as f64 <= max,
            None => true,
        },
        ValidationRuleType::Pattern => match rule.value.as_ref().and_then(Value::as_str) {
            Some(pattern) => match Regex::new(pattern) {
                Ok(regex) => regex.is_match(text),
                Err(error) => {
                    tracing::warn!(%pattern, %error, "invalid validation pattern");
                    false
                }
            },
            None => true,
        },
        ValidationRuleType::Cpf => is_valid_cpf(text),
        ValidationRuleType::Cnpj => is_valid_cnpj(text),
        ValidationRuleType::Phone => is_valid_phone(text),
        ValidationRuleType::Cep => is_valid_cep(text),
        ValidationRuleType::Custom => check_custom(value, rule),
    }
}

fn check_custom(value: &Value, rule: &ValidationRule) -> bool {
    let Some(raw) = &rule.value else {
        return true;
    };
    let expression = match serde_json::from_value::<Expression>(raw.clone()) {
        Ok(expression) => expression,
        Err(error) => {
            tracing::warn!(%error, "custom validator is not an expression");
            return false;
        }
    };
    match expression.evaluate_with("value", value) {
        Ok(result) => coerce::truthy(Some(&result)),
        Err(error) => {
            tracing::warn!(%error, "custom validator failed");
            false
        }
    }
}

/// Validates one field's value against its rules, adding a `required` check
/// when `required` is set and the rules do not already carry one.
pub fn validate_field(field: &FieldDefinition, value: &Value, required: bool) -> FieldValidation {
    let rules = field.rules();
    let has_required_rule = rules
        .iter()
        .any(|rule| rule.kind == ValidationRuleType::Required);

    if required && !has_required_rule {
        let mut all = Vec::with_capacity(rules.len() + 1);
        all.push(ValidationRule::new(ValidationRuleType::Required));
        all.extend_from_slice(rules);
        return validate_sync(value, &all);
    }

    if !required && has_required_rule {
        let optional: Vec<ValidationRule> = rules
            .iter()
            .filter(|rule| rule.kind != ValidationRuleType::Required)
            .cloned()
            .collect();
        return validate_sync(value, &optional);
    }

    validate_sync(value, rules)
}

/// Validates every visible field of `step`. Hidden fields are skipped; a
/// field's `required` flag comes from its runtime state when one is known.
pub fn validate_step(
    step: &StepDefinition,
    values: &BTreeMap<String, Value>,
    states: &BTreeMap<String, FieldRuntimeState>,
) -> Vec<StepError> {
    let mut errors = Vec::new();
    for field in &step.fields {
        let state = states
            .get(&field.id)
            .copied()
            .unwrap_or_else(|| FieldRuntimeState::from_definition(field));
        if !state.visible {
            continue;
        }

        let value = values.get(&field.name).unwrap_or(&Value::Null);
        let result = validate_field(field, value, state.required);
        errors.extend(
            result
                .errors
                .into_iter()
                .map(|message| StepError::field(field.name.clone(), message)),
        );
    }
    errors
}

fn only_digits(text: &str) -> Vec<u32> {
    text.chars().filter_map(|ch| ch.to_digit(10)).collect()
}

fn all_same(digits: &[u32]) -> bool {
    digits.windows(2).all(|pair| pair[0] == pair[1])
}

pub fn is_valid_email(text: &str) -> bool {
    Regex::new(EMAIL_PATTERN).is_ok_and(|regex| regex.is_match(text))
}

/// Brazilian individual taxpayer id: 11 digits, two mod-11 check digits.
pub fn is_valid_cpf(text: &str) -> bool {
    let digits = only_digits(text);
    if digits.len() != 11 || all_same(&digits) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let sum: u32 = digits[..len]
            .iter()
            .enumerate()
            .map(|(i, digit)| digit * (len as u32 + 1 - i as u32))
            .sum();
        match 11 - sum % 11 {
            10 | 11 => 0,
            rest => rest,
        }
    };

    check(9) == digits[9] && check(10) == digits[10]
}

/// Brazilian company id: 14 digits, weights cycling 9..2.
pub fn is_valid_cnpj(text: &str) -> bool {
    let digits = only_digits(text);
    if digits.len() != 14 || all_same(&digits) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let mut weight = len as u32 - 7;
        let mut sum = 0;
        for digit in &digits[..len] {
            sum += digit * weight;
            weight -= 1;
            if weight < 2 {
                weight = 9;
            }
        }
        if sum % 11 < 2 { 0 } else { 11 - sum % 11 }
    };

    check(12) == digits[12] && check(13) == digits[13]
}

pub fn is_valid_phone(text: &str) -> bool {
    matches!(only_digits(text).len(), 10 | 11)
}

pub fn is_valid_cep(text: &str) -> bool {
    only_digits(text).len() == 8
}
