pub mod context;
pub mod flow;
pub mod template;

pub use context::ProjectContext;
pub use flow::{
    CreateFlowRequest, Flow, FlowOperation, FlowStatus, FlowVersion, FlowVersionState,
    ImportFlowRequest,
};
pub use template::{
    prompt_fallback_name, FlowTemplate, GeneratedFlow, SchemaVersion, TriggerDefinition,
    TriggerType,
};
