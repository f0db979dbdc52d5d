//! Flow persistence: create an empty draft flow, then import a template into it.
//!
//! `HttpFlowClient` talks to the flows API; `InMemoryFlowStore` keeps flows in
//! process and backs both the tests and the development server.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::FlowsConfig;
use crate::models::{CreateFlowRequest, Flow, FlowOperation, FlowTemplate, ImportFlowRequest};

pub const FLOWS_PATH: &str = "/v1/flows";

#[async_trait]
pub trait FlowPersistence: Send + Sync {
    /// Create an empty draft flow.
    async fn create(&self, request: &CreateFlowRequest) -> Result<Flow, PersistenceError>;

    /// Replace the definition of an existing flow with `template`.
    async fn import_template(
        &self,
        flow_id: &str,
        template: &FlowTemplate,
    ) -> Result<Flow, PersistenceError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Flow {flow_id} not found")]
    NotFound { flow_id: String },

    #[error("Invalid response: {0}")]
    MalformedResponse(String),

    #[error("Timed out after {limit:?}")]
    Timeout { limit: Duration },

    #[error("Cancelled")]
    Cancelled,
}

impl PersistenceError {
    pub fn is_connect(&self) -> bool {
        matches!(self, PersistenceError::Http(e) if e.is_connect())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
}

// ============================================================================
// HttpFlowClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpFlowClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl HttpFlowClient {
    pub fn new(config: &FlowsConfig) -> Result<Self, PersistenceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn with_reconnect<T, F, Fut>(&self, action: F) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PersistenceError>>,
    {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(retry_strategy, action, PersistenceError::is_connect).await
    }

    async fn create_once(&self, request: &CreateFlowRequest) -> Result<Flow, PersistenceError> {
        let url = format!("{}{}", self.base_url, FLOWS_PATH);
        let response = self
            .authorized(self.client.post(&url))
            .json(request)
            .send()
            .await?;
        decode(response, None).await
    }

    async fn import_once(
        &self,
        flow_id: &str,
        operation: &FlowOperation,
    ) -> Result<Flow, PersistenceError> {
        let url = format!("{}{}/{}", self.base_url, FLOWS_PATH, flow_id);
        let response = self
            .authorized(self.client.post(&url))
            .json(operation)
            .send()
            .await?;
        decode(response, Some(flow_id)).await
    }
}

async fn decode<T: DeserializeOwned>(
    response: Response,
    flow_id: Option<&str>,
) -> Result<T, PersistenceError> {
    let status = response.status();
    let body = response.text().await?;

    if status == reqwest::StatusCode::NOT_FOUND {
        if let Some(flow_id) = flow_id {
            return Err(PersistenceError::NotFound {
                flow_id: flow_id.to_string(),
            });
        }
    }

    if !status.is_success() {
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|e| e.message.or(e.error))
            .unwrap_or(body);

        tracing::error!(code = status.as_u16(), message = %message, "Flows API error");

        return Err(PersistenceError::Api {
            code: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| PersistenceError::MalformedResponse(e.to_string()))
}

#[async_trait]
impl FlowPersistence for HttpFlowClient {
    async fn create(&self, request: &CreateFlowRequest) -> Result<Flow, PersistenceError> {
        self.with_reconnect(|| self.create_once(request)).await
    }

    async fn import_template(
        &self,
        flow_id: &str,
        template: &FlowTemplate,
    ) -> Result<Flow, PersistenceError> {
        let operation = FlowOperation::ImportFlow(ImportFlowRequest::from(template.clone()));
        self.with_reconnect(|| self.import_once(flow_id, &operation))
            .await
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// InMemoryFlowStore
// ============================================================================

/// Process-local flow store. Folder names are used as folder ids verbatim.
#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    flows: RwLock<HashMap<String, Flow>>,
    create_calls: AtomicUsize,
    import_calls: AtomicUsize,
    fail_creates: AtomicBool,
    fail_imports: AtomicBool,
    delay: Option<Duration>,
    import_delay: Option<Duration>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `create`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep this long inside every `import_template`.
    pub fn with_import_delay(mut self, delay: Duration) -> Self {
        self.import_delay = Some(delay);
        self
    }

    /// Make subsequent `create` calls fail with a 500.
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `import_template` calls fail with a 500.
    pub fn set_fail_imports(&self, fail: bool) {
        self.fail_imports.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn import_calls(&self) -> usize {
        self.import_calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, flow_id: &str) -> Option<Flow> {
        self.flows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(flow_id)
            .cloned()
    }

    pub fn list(&self) -> Vec<Flow> {
        let mut flows: Vec<Flow> = self
            .flows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        flows.sort_by(|a, b| a.created.cmp(&b.created));
        flows
    }

    pub fn len(&self) -> usize {
        self.flows.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a flow operation to a stored flow.
    pub fn apply(&self, flow_id: &str, operation: &FlowOperation) -> Result<Flow, PersistenceError> {
        self.import_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_imports.load(Ordering::SeqCst) {
            return Err(PersistenceError::Api {
                code: 500,
                message: "import failed".to_string(),
            });
        }

        let mut flows = self.flows.write().unwrap_or_else(|e| e.into_inner());
        let flow = flows
            .get_mut(flow_id)
            .ok_or_else(|| PersistenceError::NotFound {
                flow_id: flow_id.to_string(),
            })?;

        match operation {
            FlowOperation::ImportFlow(request) => flow.apply_import(request),
        }

        tracing::debug!(flow_id = %flow_id, "Imported template into flow");
        Ok(flow.clone())
    }
}

#[async_trait]
impl FlowPersistence for InMemoryFlowStore {
    async fn create(&self, request: &CreateFlowRequest) -> Result<Flow, PersistenceError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(PersistenceError::Api {
                code: 500,
                message: "create failed".to_string(),
            });
        }

        let flow = Flow::new_draft(
            request.project_id.clone(),
            request.display_name.clone(),
            request.folder_name.clone(),
        );
        self.flows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(flow.id.clone(), flow.clone());

        tracing::debug!(flow_id = %flow.id, "Created draft flow");
        Ok(flow)
    }

    async fn import_template(
        &self,
        flow_id: &str,
        template: &FlowTemplate,
    ) -> Result<Flow, PersistenceError> {
        if let Some(delay) = self.import_delay {
            tokio::time::sleep(delay).await;
        }

        let operation = FlowOperation::ImportFlow(ImportFlowRequest::from(template.clone()));
        self.apply(flow_id, &operation)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SchemaVersion, TriggerDefinition};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String, api_key: Option<&str>) -> FlowsConfig {
        FlowsConfig {
            base_url,
            api_key: api_key.map(str::to_string),
            timeout_seconds: 5,
            max_retries: 1,
            retry_delay_ms: 10,
            untitled_name: "Untitled".to_string(),
        }
    }

    fn template() -> FlowTemplate {
        FlowTemplate {
            display_name: "Daily Report Bot".to_string(),
            trigger: TriggerDefinition::empty(),
            schema_version: SchemaVersion::Number(1),
        }
    }

    fn flow_json(id: &str, display_name: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "projectId": "proj-1",
            "folderId": null,
            "status": "DISABLED",
            "created": "2024-05-01T10:00:00Z",
            "updated": "2024-05-01T10:00:00Z",
            "version": {
                "id": "ver-1",
                "flowId": id,
                "displayName": display_name,
                "trigger": { "name": "trigger", "type": "EMPTY", "displayName": "Select Trigger", "valid": false, "settings": {} },
                "state": "DRAFT",
                "valid": false
            }
        })
    }

    #[tokio::test]
    async fn test_http_create_posts_request_with_bearer_token() {
        let mock_server = MockServer::start().await;
        let client = HttpFlowClient::new(&test_config(mock_server.uri(), Some("tok"))).unwrap();

        Mock::given(method("POST"))
            .and(path(FLOWS_PATH))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(serde_json::json!({
                "projectId": "proj-1",
                "displayName": "Untitled",
                "folderName": "Reports"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(flow_json("flow-1", "Untitled")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let flow = client
            .create(&CreateFlowRequest::new("proj-1", "Untitled", Some("Reports".to_string())))
            .await
            .expect("create should succeed");

        assert_eq!(flow.id, "flow-1");
        assert!(flow.is_draft());
    }

    #[tokio::test]
    async fn test_http_import_sends_import_flow_operation() {
        let mock_server = MockServer::start().await;
        let client = HttpFlowClient::new(&test_config(mock_server.uri(), None)).unwrap();

        Mock::given(method("POST"))
            .and(path("/v1/flows/flow-1"))
            .and(body_json(serde_json::json!({
                "type": "IMPORT_FLOW",
                "request": {
                    "displayName": "Daily Report Bot",
                    "trigger": { "name": "trigger", "type": "EMPTY", "displayName": "Select Trigger", "valid": false, "settings": {} },
                    "schemaVersion": 1
                }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(flow_json("flow-1", "Daily Report Bot")),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let flow = client.import_template("flow-1", &template()).await.unwrap();
        assert_eq!(flow.display_name(), "Daily Report Bot");
    }

    #[tokio::test]
    async fn test_http_import_maps_404_to_not_found() {
        let mock_server = MockServer::start().await;
        let client = HttpFlowClient::new(&test_config(mock_server.uri(), None)).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let err = client.import_template("missing", &template()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { ref flow_id } if flow_id == "missing"));
    }

    #[tokio::test]
    async fn test_http_create_maps_error_status() {
        let mock_server = MockServer::start().await;
        let client = HttpFlowClient::new(&test_config(mock_server.uri(), None)).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": "forbidden"
            })))
            .mount(&mock_server)
            .await;

        match client.create(&CreateFlowRequest::new("proj-1", "Untitled", None)).await {
            Err(PersistenceError::Api { code, message }) => {
                assert_eq!(code, 403);
                assert_eq!(message, "forbidden");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_in_memory_create_then_import() {
        let store = InMemoryFlowStore::new();
        let created = store
            .create(&CreateFlowRequest::new("proj-1", "Untitled", None))
            .await
            .unwrap();
        let imported = store.import_template(&created.id, &template()).await.unwrap();

        assert_eq!(imported.id, created.id);
        assert_eq!(imported.display_name(), "Daily Report Bot");
        assert_eq!(store.get(&created.id).unwrap().display_name(), "Daily Report Bot");
        assert_eq!(store.create_calls(), 1);
        assert_eq!(store.import_calls(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_failed_import_leaves_draft_in_place() {
        let store = InMemoryFlowStore::new();
        store.set_fail_imports(true);
        let created = store
            .create(&CreateFlowRequest::new("proj-1", "Untitled", None))
            .await
            .unwrap();

        assert!(store.import_template(&created.id, &template()).await.is_err());
        let stored = store.get(&created.id).expect("draft should remain");
        assert!(stored.is_draft());
        assert_eq!(stored.display_name(), "Untitled");
    }

    #[tokio::test]
    async fn test_in_memory_import_unknown_flow() {
        let store = InMemoryFlowStore::new();
        let err = store.import_template("nope", &template()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { .. }));
    }
}
