use thiserror::Error;

use crate::flows::PersistenceError;
use crate::generation::GenerationError;

#[derive(Error, Debug)]
pub enum InventError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Generation client error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Flows client error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Failure of one workflow invocation.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Flow generation failed: {0}")]
    GenerationFailed(#[from] GenerationError),

    #[error("Flow persistence failed: {0}")]
    PersistenceFailed(#[from] PersistenceError),
}

impl WorkflowError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            WorkflowError::GenerationFailed(GenerationError::Cancelled)
                | WorkflowError::PersistenceFailed(PersistenceError::Cancelled)
        )
    }
}
