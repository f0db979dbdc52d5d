pub mod config;
pub mod error;
pub mod flows;
pub mod generation;
pub mod models;
pub mod notify;
pub mod orchestrator;

pub use config::InventConfig;
pub use error::{InventError, WorkflowError};
pub use flows::{FlowPersistence, HttpFlowClient, InMemoryFlowStore, PersistenceError};
pub use generation::{
    CannedGenerationClient, GenerationClient, GenerationError, GenerationRequest,
    HttpGenerationClient, GENERATE_PATH,
};
pub use models::{Flow, FlowTemplate, GeneratedFlow, ProjectContext, TriggerDefinition};
pub use notify::{Notification, NotificationKind, Notifier, RecordingNotifier, TracingNotifier};
pub use orchestrator::{
    FolderResolver, IgnoreReason, InventOrchestrator, StartOutcome, SuccessCallback,
    WorkflowOptions, WorkflowState,
};
