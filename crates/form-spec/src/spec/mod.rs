pub mod field;
pub mod form;
pub mod mapping;
pub mod step;
pub mod webhook;

pub use field::{
    AsyncValidation, FieldAction, FieldCondition, FieldConditionalLogic, FieldDefinition,
    FieldOption, FieldRuntimeState, FieldType, ValidationConfig, ValidationRule,
    ValidationRuleType, WebhookFieldCondition,
};
pub use form::{FormDefinition, SpecError, form_schema};
pub use mapping::{
    DataMappingConfig, DataMappingRule, FieldTransformation, TransformationConfig,
    TransformationType,
};
pub use step::{StepAction, StepConditionalLogic, StepDefinition, StepRule};
pub use webhook::{
    AuthType, HttpMethod, PayloadMapping, SelectedField, SendType, VariableDefinition,
    VariableType, WebhookDefinition,
};
