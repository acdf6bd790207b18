use form_spec::mask::resolve_mask;
use form_spec::render::{RenderField, RenderPayload, RenderStatus, value_to_display};
use form_spec::{FieldType, StepError, ValueMap};
use serde_json::Value;

/// Controls which bits of state the wizard prints.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum Verbosity {
    /// Clean output: field prompts only.
    Clean,
    /// Verbose output: status, visible fields, error details, help text.
    Verbose,
}

impl Verbosity {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Clean
        }
    }

    pub fn is_verbose(&self) -> bool {
        matches!(self, Verbosity::Verbose)
    }
}

/// Prints step headers, prompts and outcomes for the interactive runner.
pub struct WizardPresenter {
    verbosity: Verbosity,
    header_printed: bool,
    show_values_json: bool,
}

impl WizardPresenter {
    pub fn new(verbosity: Verbosity, show_values_json: bool) -> Self {
        Self {
            verbosity,
            header_printed: false,
            show_values_json,
        }
    }

    pub fn show_header(&mut self, payload: &RenderPayload) {
        if self.header_printed {
            return;
        }
        let title = if payload.form_name.is_empty() {
            &payload.form_id
        } else {
            &payload.form_name
        };
        println!("Form: {}", title);
        if self.verbosity.is_verbose() {
            println!("Type 'back' to return to the previous step or 'exit' to quit.");
        }
        self.header_printed = true;
    }

    pub fn show_step(&self, payload: &RenderPayload) {
        println!(
            "Step {}/{}: {}",
            payload.progress.step, payload.progress.total, payload.step_title
        );
        if let Some(description) = &payload.step_description {
            println!("{}", description);
        }
        for error in &payload.step_errors {
            eprintln!("Error: {}", error);
        }
        if self.verbosity.is_verbose() {
            println!("Status: {}", payload.status.as_str());
            self.print_visible_fields(payload);
        } else if payload.status == RenderStatus::NeedInput && visible_count(payload) == 0 {
            println!("No visible fields on this step; submitting.");
        }
    }

    fn print_visible_fields(&self, payload: &RenderPayload) {
        println!("Visible fields:");
        for field in payload.fields.iter().filter(|field| field.state.visible) {
            let mut entry = format!(" - {} ({})", field.name, field.label);
            if field.state.required {
                entry.push_str(" [required]");
            }
            if field.state.disabled {
                entry.push_str(" [disabled]");
            }
            println!("{}", entry);
        }
    }

    pub fn show_prompt(&self, prompt: &PromptContext) {
        let mut line = format!("{}/{} {}", prompt.index, prompt.total, prompt.label);
        if prompt.required {
            line.push_str(" *");
        }
        if let Some(hint) = &prompt.hint {
            line.push(' ');
            line.push_str(hint);
        }
        if let Some(current) = &prompt.current {
            line.push_str(&format!(" [{}]", current));
        }
        println!("{}", line);
        if let Some(help) = &prompt.help {
            println!("{}", help);
        }
        if self.verbosity.is_verbose() && !prompt.choices.is_empty() {
            println!("Choices: {}", prompt.choices.join(", "));
        }
    }

    pub fn show_parse_error(&self, error: &AnswerParseError) {
        eprintln!("Invalid answer: {}", error.user_message);
        if self.verbosity.is_verbose()
            && let Some(debug) = &error.debug_message
        {
            eprintln!("  Expected: {}", debug);
        }
    }

    pub fn show_validation_errors(&self, errors: &[StepError]) {
        eprintln!("Please fix the following:");
        for error in errors {
            match &error.field {
                Some(field) => eprintln!("  {}: {}", field, error.message),
                None => eprintln!("  {}", error.message),
            }
        }
    }

    pub fn show_notice(&self, message: &str) {
        println!("{}", message);
    }

    pub fn show_completion(&self, values: &ValueMap) {
        println!("Done ✅");
        if self.show_values_json {
            match serde_json::to_string_pretty(values) {
                Ok(pretty) => println!("{}", pretty),
                Err(err) => eprintln!("Failed to serialize values to JSON: {}", err),
            }
        } else {
            for (name, value) in values {
                println!("  {} = {}", name, value_to_display(value));
            }
        }
    }
}

fn visible_count(payload: &RenderPayload) -> usize {
    payload
        .fields
        .iter()
        .filter(|field| field.state.visible)
        .count()
}

/// Context used to format a single field prompt.
pub struct PromptContext {
    pub index: usize,
    pub total: usize,
    pub label: String,
    pub help: Option<String>,
    pub required: bool,
    pub hint: Option<String>,
    pub choices: Vec<String>,
    pub current: Option<String>,
}

impl PromptContext {
    /// `position` is the zero-based index among the step's visible fields.
    pub fn new(field: &RenderField, position: usize, total: usize) -> Self {
        let choices = field
            .options
            .as_ref()
            .map(|options| options.iter().map(|option| option.value.clone()).collect())
            .unwrap_or_default();
        Self {
            index: position + 1,
            total,
            label: field.label.clone(),
            help: field.help_text.clone().or_else(|| field.placeholder.clone()),
            required: field.state.required,
            hint: field_hint(field),
            choices,
            current: field
                .current_value
                .as_ref()
                .filter(|value| !value.is_null())
                .map(value_to_display),
        }
    }
}

fn field_hint(field: &RenderField) -> Option<String> {
    if let Some(mask) = &field.mask {
        return Some(format!("({})", resolve_mask(mask)));
    }
    match field.kind {
        FieldType::Checkbox if field.options.is_none() => Some("(yes/no)".to_string()),
        FieldType::Number => Some("(number)".to_string()),
        FieldType::Date => Some("(YYYY-MM-DD)".to_string()),
        FieldType::Time => Some("(HH:MM)".to_string()),
        FieldType::Select | FieldType::Radio => field.options.as_ref().map(|options| {
            let values: Vec<&str> = options.iter().map(|option| option.value.as_str()).collect();
            format!("({})", values.join("/"))
        }),
        _ => None,
    }
}

/// What the user typed for a field, once parsed.
#[derive(Debug, PartialEq)]
pub enum FieldInput {
    Value(Value),
    /// Empty input on a field that already has a value.
    Keep,
    /// Empty input on an optional field.
    Skip,
    Back,
}

/// Error produced when parsing answers from the user.
#[derive(Debug)]
pub struct AnswerParseError {
    pub user_message: String,
    pub debug_message: Option<String>,
}

impl AnswerParseError {
    pub fn new(user_message: impl Into<String>, debug_message: Option<String>) -> Self {
        Self {
            user_message: user_message.into(),
            debug_message,
        }
    }
}
