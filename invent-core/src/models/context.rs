use serde::{Deserialize, Serialize};

/// Identity of the caller on whose behalf a workflow runs.
///
/// Passed explicitly into every orchestrator invocation instead of being read
/// from ambient session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectContext {
    pub project_id: String,
    pub user_id: String,
}

impl ProjectContext {
    pub fn new(project_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            user_id: user_id.into(),
        }
    }
}
