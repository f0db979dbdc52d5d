use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::template::{FlowTemplate, SchemaVersion, TriggerDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Enabled,
    #[default]
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowVersionState {
    #[default]
    Draft,
    Locked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowVersion {
    pub id: String,
    pub flow_id: String,
    pub display_name: String,
    pub trigger: TriggerDefinition,
    #[serde(default)]
    pub state: FlowVersionState,
    #[serde(default)]
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<SchemaVersion>,
}

/// A persisted flow together with its current version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub status: FlowStatus,
    #[serde(default)]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub updated: DateTime<Utc>,
    pub version: FlowVersion,
}

impl Flow {
    /// A new, empty draft flow.
    pub fn new_draft(
        project_id: impl Into<String>,
        display_name: impl Into<String>,
        folder_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4().simple().to_string();
        Self {
            version: FlowVersion {
                id: Uuid::new_v4().simple().to_string(),
                flow_id: id.clone(),
                display_name: display_name.into(),
                trigger: TriggerDefinition::empty(),
                state: FlowVersionState::Draft,
                valid: false,
                schema_version: None,
            },
            id,
            project_id: project_id.into(),
            folder_id,
            status: FlowStatus::Disabled,
            created: now,
            updated: now,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.version.display_name
    }

    pub fn is_draft(&self) -> bool {
        self.version.state == FlowVersionState::Draft
    }

    /// Replace the current version's definition with an imported template.
    pub fn apply_import(&mut self, request: &ImportFlowRequest) {
        self.version.display_name = request.display_name.clone();
        self.version.valid = request.trigger.valid;
        self.version.trigger = request.trigger.clone();
        self.version.schema_version = Some(request.schema_version.clone());
        self.updated = Utc::now();
    }
}

/// Body of the flow creation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlowRequest {
    pub project_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_name: Option<String>,
}

impl CreateFlowRequest {
    pub fn new(
        project_id: impl Into<String>,
        display_name: impl Into<String>,
        folder_name: Option<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            display_name: display_name.into(),
            folder_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFlowRequest {
    pub display_name: String,
    pub trigger: TriggerDefinition,
    pub schema_version: SchemaVersion,
}

impl From<FlowTemplate> for ImportFlowRequest {
    fn from(template: FlowTemplate) -> Self {
        Self {
            display_name: template.display_name,
            trigger: template.trigger,
            schema_version: template.schema_version,
        }
    }
}

/// Body of the flow update endpoint. Only template import is issued here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "request", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowOperation {
    ImportFlow(ImportFlowRequest),
}
