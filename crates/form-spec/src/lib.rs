#![allow(missing_docs)]

pub mod async_validate;
pub mod coerce;
pub mod config;
pub mod expr;
pub mod mapping;
pub mod mask;
pub mod orchestrator;
pub mod path;
pub mod render;
pub mod rules;
pub mod session;
pub mod spec;
pub mod step_validate;
pub mod submission;
pub mod transport;
pub mod validate;
pub mod variables;
pub mod visibility;
pub mod webhook;

pub use async_validate::{ASYNC_FAILURE_MESSAGE, AsyncOutcome, AsyncValidator};
pub use config::{ConfigError, EngineConfig};
pub use expr::{ExprError, Expression, ExpressionKind};
pub use mapping::{
    MappingOperation, MappingOperationKind, apply_mapping, apply_transformations, extract_paths,
    map_payload, transform_value,
};
pub use mask::{CANONICAL_MASKS, apply_mask};
pub use orchestrator::{OrchestratorError, StepOrchestrator, SubmitOutcome};
pub use render::{
    RenderField, RenderPayload, RenderProgress, RenderStatus, build_render_payload,
    render_json_ui, render_text,
};
pub use rules::{Operator, evaluate, evaluate_path};
pub use session::{Phase, SessionSnapshot, SessionState, ValueMap};
pub use spec::{
    DataMappingConfig, DataMappingRule, FieldCondition, FieldConditionalLogic, FieldDefinition,
    FieldRuntimeState, FieldTransformation, FieldType, FormDefinition, SpecError,
    StepConditionalLogic, StepDefinition, StepRule, ValidationRule, ValidationRuleType,
    VariableDefinition, WebhookDefinition, form_schema,
};
pub use step_validate::{STEP_CHECK_FAILURE_MESSAGE, StepCheck, StepValidator};
pub use submission::{HttpSubmissionHandler, NoopSubmission, SubmissionError, SubmissionHandler};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use validate::{
    FieldValidation, StepError, is_valid_cnpj, is_valid_cpf, validate_field, validate_step,
    validate_sync,
};
pub use variables::extract_variables;
pub use visibility::{FieldResolution, FieldStateMap, resolve_field_states};
pub use webhook::{
    WebhookError, WebhookExecutor, WebhookMeta, WebhookPayload, WebhookResponse, build_headers,
    build_payload,
};
