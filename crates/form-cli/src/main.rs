mod wizard;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use component_form::{
    apply_mapping, apply_mask, check_form, extract_paths, extract_variables, get_form_schema,
    validate_step,
};
use form_spec::coerce::number_value;
use form_spec::render::{RenderField, render_json_ui};
use form_spec::{
    AsyncOutcome, EngineConfig, FieldType, FormDefinition, HttpSubmissionHandler, HttpTransport,
    ReqwestTransport, StepOrchestrator, SubmitOutcome, ValueMap, build_render_payload,
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;
use wizard::{AnswerParseError, FieldInput, PromptContext, Verbosity, WizardPresenter};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Multi-step conditional form runner",
    long_about = "Runs multi-step forms with conditional fields, step webhooks and data mapping, and exposes the engine helpers used to author them"
)]
struct Cli {
    /// Show verbose output and debug logs.
    #[arg(long, global = true, alias = "debug")]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RenderMode {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Fill a form interactively, one step at a time.
    Run {
        /// Path to the form definition JSON.
        #[arg(long, value_name = "FORM")]
        form: PathBuf,
        /// Optional JSON object of initial values keyed by field name.
        #[arg(long, value_name = "VALUES")]
        answers: Option<PathBuf>,
        /// Print the completed values as JSON.
        #[arg(long)]
        values_json: bool,
        /// Render output mode for each step.
        #[arg(long, value_enum, default_value_t = RenderMode::Text)]
        format: RenderMode,
        /// HTTP timeout for webhooks and remote validation.
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        /// POST the completed values to the form endpoint.
        #[arg(long)]
        submit: bool,
    },
    /// Drive a form to completion from a JSON object of values.
    Replay {
        #[arg(long, value_name = "FORM")]
        form: PathBuf,
        #[arg(long, value_name = "VALUES")]
        answers: PathBuf,
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        #[arg(long)]
        submit: bool,
    },
    /// Check a form definition for structural errors.
    Check {
        #[arg(long, value_name = "FORM")]
        form: PathBuf,
    },
    /// Print the JSON Schema of form definitions.
    Schema,
    /// List the dotted paths of a sample JSON payload.
    Paths {
        #[arg(long, value_name = "PAYLOAD")]
        payload: PathBuf,
    },
    /// Apply data mapping rules to a JSON payload.
    Map {
        /// JSON array of `{source, target, transform?}` rules.
        #[arg(long, value_name = "RULES")]
        rules: PathBuf,
        #[arg(long, value_name = "PAYLOAD")]
        payload: PathBuf,
    },
    /// Extract typed variables from a webhook response body.
    Extract {
        /// JSON array of `{name, path, type}` variable definitions.
        #[arg(long, value_name = "VARIABLES")]
        variables: PathBuf,
        #[arg(long, value_name = "RESPONSE")]
        response: PathBuf,
    },
    /// Validate one step's values without running the form.
    Validate {
        #[arg(long, value_name = "FORM")]
        form: PathBuf,
        /// Zero-based step index.
        #[arg(long, default_value_t = 0)]
        step: usize,
        #[arg(long, value_name = "VALUES")]
        values: PathBuf,
    },
    /// Format raw input with a mask (`cpf`, `cnpj`, `phone`, `cep`, ... or a literal pattern).
    Mask { mask: String, input: String },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Run {
            form,
            answers,
            values_json,
            format,
            timeout_ms,
            submit,
        } => {
            run_interactive(
                form,
                answers,
                cli.verbose,
                values_json,
                format,
                timeout_ms,
                submit,
            )
            .await
        }
        Command::Replay {
            form,
            answers,
            timeout_ms,
            submit,
        } => run_replay(form, answers, timeout_ms, submit).await,
        Command::Check { form } => run_check(form),
        Command::Schema => {
            let schema = parse_component_result(&get_form_schema())?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        Command::Paths { payload } => run_paths(payload),
        Command::Map { rules, payload } => run_map(rules, payload),
        Command::Extract {
            variables,
            response,
        } => {
            let variables = fs::read_to_string(variables)?;
            let response = fs::read_to_string(response)?;
            let extracted = parse_component_result(&extract_variables(&response, &variables))?;
            println!("{}", serde_json::to_string_pretty(&extracted)?);
            Ok(())
        }
        Command::Validate {
            form,
            step,
            values,
        } => run_validate(form, step, values),
        Command::Mask { mask, input } => {
            let masked = parse_component_result(&apply_mask(&mask, &input))?;
            println!("{}", masked["value"].as_str().unwrap_or_default());
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn load_form(path: &Path) -> CliResult<FormDefinition> {
    let contents = fs::read_to_string(path)?;
    let form: FormDefinition = serde_json::from_str(&contents)?;
    Ok(form)
}

fn read_values(path: &Path) -> CliResult<ValueMap> {
    let contents = fs::read_to_string(path)?;
    let values: ValueMap = serde_json::from_str(&contents)?;
    Ok(values)
}

fn config_json(path: &Path) -> CliResult<String> {
    let form = fs::read_to_string(path)?;
    Ok(json!({ "form_json": form }).to_string())
}

fn parse_component_result(response: &str) -> CliResult<Value> {
    let value: Value = serde_json::from_str(response)?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        Err(error.into())
    } else {
        Ok(value)
    }
}

fn build_orchestrator(
    form: &FormDefinition,
    timeout_ms: Option<u64>,
    submit: bool,
) -> CliResult<StepOrchestrator> {
    let mut config = EngineConfig::from_env()?;
    if let Some(timeout_ms) = timeout_ms {
        config = config.with_timeout_ms(timeout_ms);
    }
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&config)?);
    let mut orchestrator = StepOrchestrator::new(form, Arc::clone(&transport))?;

    if submit {
        match &form.endpoint {
            Some(endpoint) => {
                orchestrator = orchestrator.with_submission_handler(Arc::new(
                    HttpSubmissionHandler::new(transport, endpoint.clone()),
                ));
            }
            None => tracing::warn!(form = %form.id, "--submit given but the form has no endpoint"),
        }
    }
    Ok(orchestrator)
}

async fn run_interactive(
    form_path: PathBuf,
    answers_path: Option<PathBuf>,
    verbose: bool,
    values_json: bool,
    format: RenderMode,
    timeout_ms: Option<u64>,
    submit: bool,
) -> CliResult<()> {
    let form = load_form(&form_path)?;
    let orchestrator = build_orchestrator(&form, timeout_ms, submit)?;
    let mut prefill = match answers_path {
        Some(path) => read_values(&path)?,
        None => ValueMap::new(),
    };
    let mut presenter = WizardPresenter::new(Verbosity::from_verbose(verbose), values_json);

    loop {
        let payload = build_render_payload(orchestrator.form(), &orchestrator.snapshot());
        presenter.show_header(&payload);
        match format {
            RenderMode::Text => presenter.show_step(&payload),
            RenderMode::Json => {
                println!("{}", serde_json::to_string_pretty(&render_json_ui(&payload))?)
            }
        }

        let visible: Vec<&RenderField> = payload
            .fields
            .iter()
            .filter(|field| field.state.visible)
            .collect();
        let mut values = ValueMap::new();
        let mut back = false;

        for (position, field) in visible.iter().enumerate() {
            if field.state.disabled {
                if let Some(current) = &field.current_value {
                    values.insert(field.name.clone(), current.clone());
                }
                continue;
            }
            if let Some(value) = prefill.remove(&field.name) {
                let stored = orchestrator.set_value(&field.name, value)?;
                values.insert(field.name.clone(), stored);
                continue;
            }

            match prompt_field(&orchestrator, field, position, visible.len(), &presenter).await? {
                FieldInput::Value(value) => {
                    values.insert(field.name.clone(), value);
                }
                FieldInput::Keep | FieldInput::Skip => {}
                FieldInput::Back => {
                    back = true;
                    break;
                }
            }
        }

        if back {
            if let Err(error) = orchestrator.previous_step() {
                presenter.show_notice(&error.to_string());
            }
            continue;
        }

        match orchestrator.submit(values).await {
            Ok(SubmitOutcome::Invalid { errors }) => presenter.show_validation_errors(&errors),
            Ok(SubmitOutcome::Advanced { from, to, skipped }) => {
                tracing::debug!(from, to, skipped, "advanced");
            }
            Ok(SubmitOutcome::Completed { values }) => {
                presenter.show_completion(&values);
                return Ok(());
            }
            Ok(SubmitOutcome::Cancelled) => return Err("the session was reset".into()),
            Err(error) => {
                eprintln!("Submission failed: {}", error);
                presenter.show_notice("Review the step and submit again.");
            }
        }
    }
}

/// Prompts until the input parses and passes the field's validation. The
/// accepted value is already stored on the orchestrator.
async fn prompt_field(
    orchestrator: &StepOrchestrator,
    field: &RenderField,
    position: usize,
    total: usize,
    presenter: &WizardPresenter,
) -> CliResult<FieldInput> {
    loop {
        let mut field = field.clone();
        field.current_value = orchestrator.snapshot().values.get(&field.name).cloned();
        let prompt = PromptContext::new(&field, position, total);
        presenter.show_prompt(&prompt);
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Err("input closed before the form was complete".into());
        }
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("exit") {
            return Err("wizard aborted by user".into());
        }

        let value = match parse_field_input(&field, trimmed) {
            Ok(FieldInput::Value(value)) => orchestrator.set_value(&field.name, value)?,
            Ok(FieldInput::Keep) => match field.current_value {
                Some(current) => current,
                None => continue,
            },
            Ok(other) => return Ok(other),
            Err(err) => {
                presenter.show_parse_error(&err);
                continue;
            }
        };

        match orchestrator
            .validate_field_async(&field.name, value.clone())
            .await?
        {
            AsyncOutcome::Invalid { message } => {
                presenter.show_parse_error(&AnswerParseError::new(message, None));
            }
            AsyncOutcome::Valid { .. } | AsyncOutcome::Superseded => {
                return Ok(FieldInput::Value(value));
            }
        }
    }
}

fn parse_field_input(field: &RenderField, raw: &str) -> Result<FieldInput, AnswerParseError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("back") {
        return Ok(FieldInput::Back);
    }
    if trimmed.is_empty() {
        if field
            .current_value
            .as_ref()
            .is_some_and(|value| !value.is_null())
        {
            return Ok(FieldInput::Keep);
        }
        if field.state.required {
            return Err(AnswerParseError::new("This field requires an answer.", None));
        }
        return Ok(FieldInput::Skip);
    }

    let value = match field.kind {
        FieldType::Checkbox if field.options.is_none() => parse_boolean(trimmed)?,
        FieldType::Checkbox => Value::Array(
            trimmed
                .split(',')
                .map(|part| parse_option(field, part.trim()))
                .collect::<Result<_, _>>()?,
        ),
        FieldType::Number => parse_number(trimmed)?,
        FieldType::Select | FieldType::Radio => parse_option(field, trimmed)?,
        _ => Value::String(trimmed.to_string()),
    };
    Ok(FieldInput::Value(value))
}

fn parse_boolean(raw: &str) -> Result<Value, AnswerParseError> {
    match raw.to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
        "false" | "f" | "no" | "n" | "0" => Ok(Value::Bool(false)),
        _ => Err(AnswerParseError::new(
            "Please enter yes or no.",
            Some("expected boolean (y/n/true/false)".to_string()),
        )),
    }
}

fn parse_number(raw: &str) -> Result<Value, AnswerParseError> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(number_value)
        .ok_or_else(|| {
            AnswerParseError::new("Please enter a number.", Some("expected number".to_string()))
        })
}

fn parse_option(field: &RenderField, raw: &str) -> Result<Value, AnswerParseError> {
    let Some(options) = &field.options else {
        return Ok(Value::String(raw.to_string()));
    };
    options
        .iter()
        .find(|option| option.value.eq_ignore_ascii_case(raw) || option.label.eq_ignore_ascii_case(raw))
        .map(|option| Value::String(option.value.clone()))
        .ok_or_else(|| {
            let allowed: Vec<&str> = options.iter().map(|option| option.value.as_str()).collect();
            AnswerParseError::new(
                format!("Choose one of: {}.", allowed.join(", ")),
                Some(format!("allowed values: {}", allowed.join(", "))),
            )
        })
}

async fn run_replay(
    form_path: PathBuf,
    answers_path: PathBuf,
    timeout_ms: Option<u64>,
    submit: bool,
) -> CliResult<()> {
    let form = load_form(&form_path)?;
    let orchestrator = build_orchestrator(&form, timeout_ms, submit)?;
    let answers = read_values(&answers_path)?;

    loop {
        let snapshot = orchestrator.snapshot();
        let step = orchestrator.current_step().ok_or("form has no current step")?;
        let mut values = ValueMap::new();
        for field in &step.fields {
            let visible = snapshot
                .field_states
                .get(&field.id)
                .is_none_or(|state| state.visible);
            if !visible {
                continue;
            }
            if let Some(value) = answers.get(&field.name) {
                let stored = orchestrator.set_value(&field.name, value.clone())?;
                values.insert(field.name.clone(), stored);
            }
        }

        tracing::info!(step = %step.id, fields = values.len(), "replaying step");
        match orchestrator.submit(values).await? {
            SubmitOutcome::Invalid { errors } => {
                for error in &errors {
                    match &error.field {
                        Some(field) => eprintln!("{}: {}", field, error.message),
                        None => eprintln!("{}", error.message),
                    }
                }
                return Err(format!("step '{}' failed validation", step.id).into());
            }
            SubmitOutcome::Advanced { .. } => {}
            SubmitOutcome::Completed { values } => {
                let output = json!({ "status": "complete", "values": values });
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(());
            }
            SubmitOutcome::Cancelled => return Err("the session was reset".into()),
        }
    }
}

fn run_check(form_path: PathBuf) -> CliResult<()> {
    let result = parse_component_result(&check_form(&config_json(&form_path)?))?;
    println!(
        "Form '{}' is valid ({} steps)",
        result["id"].as_str().unwrap_or_default(),
        result["steps"]
    );
    Ok(())
}

fn run_paths(payload_path: PathBuf) -> CliResult<()> {
    let payload = fs::read_to_string(payload_path)?;
    let paths = parse_component_result(&extract_paths(&payload))?;
    for path in paths.as_array().into_iter().flatten() {
        println!("{}", path.as_str().unwrap_or_default());
    }
    Ok(())
}

fn run_map(rules_path: PathBuf, payload_path: PathBuf) -> CliResult<()> {
    let rules = fs::read_to_string(rules_path)?;
    let payload = fs::read_to_string(payload_path)?;
    let operations = parse_component_result(&apply_mapping(&payload, &rules))?;
    println!("{}", serde_json::to_string_pretty(&operations)?);
    Ok(())
}

fn run_validate(form_path: PathBuf, step: usize, values_path: PathBuf) -> CliResult<()> {
    let form_id = load_form(&form_path)?.id;
    let values: Value = serde_json::from_str(&fs::read_to_string(values_path)?)?;
    let ctx = json!({ "step": step, "values": values });
    let result = parse_component_result(&validate_step(
        &form_id,
        &config_json(&form_path)?,
        &ctx.to_string(),
    ))?;

    if result["valid"].as_bool().unwrap_or(false) {
        println!("Step {} is valid", step);
        return Ok(());
    }
    for error in result["errors"].as_array().into_iter().flatten() {
        eprintln!(
            "{}: {}",
            error["field"].as_str().unwrap_or("step"),
            error["message"].as_str().unwrap_or_default()
        );
    }
    Err(format!("step {} has validation errors", step).into())
}
