//! Invent development backend
//!
//! Axum server that stands in for the real generation and flows services so
//! the CLI and the orchestrator can be exercised end to end. Generation is
//! answered by the canned generator and flows live in memory.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`; the inner functions are tested
//! directly.
//!
//! Endpoints:
//! - GET  /health              : liveness plus stored flow count
//! - POST /v1/invent/generate  : generate a flow template from a prompt
//! - POST /v1/flows            : create an empty draft flow
//! - GET  /v1/flows/:id        : fetch a flow
//! - POST /v1/flows/:id        : apply a flow operation (template import)

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use invent_core::flows::{InMemoryFlowStore, FLOWS_PATH};
use invent_core::generation::GenerationResponse;
use invent_core::models::{CreateFlowRequest, FlowOperation};
use invent_core::{
    CannedGenerationClient, FlowPersistence, GenerationClient, GenerationError,
    GenerationRequest, PersistenceError, GENERATE_PATH,
};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub generator: CannedGenerationClient,
    pub store: InMemoryFlowStore,
}

impl HttpState {
    pub fn new(generator: CannedGenerationClient) -> Self {
        Self {
            generator,
            store: InMemoryFlowStore::new(),
        }
    }
}

impl Default for HttpState {
    fn default() -> Self {
        Self::new(CannedGenerationClient::new())
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(GENERATE_PATH, post(generate_handler))
        .route(FLOWS_PATH, post(create_flow_handler))
        .route(
            &format!("{}/:id", FLOWS_PATH),
            get(get_flow_handler).post(update_flow_handler),
        )
        .with_state(state)
}

/// Serve on an already-bound listener until the shutdown signal fires.
pub async fn start_http_server(
    listener: TcpListener,
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = listener.local_addr()?;
    let app = build_router(state);
    tracing::info!("Invent dev backend listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

fn error_body(msg: impl Into<String>) -> serde_json::Value {
    json!(ErrorResponse::new(msg))
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "generator": state.generator.name(),
            "flows": state.store.len(),
        }),
    )
}

/// Logical failures are reported as `success: false` with a 200, the way the
/// production endpoint does.
pub async fn generate_inner(
    state: &HttpState,
    req: GenerationRequest,
) -> (StatusCode, serde_json::Value) {
    if req.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            json!(GenerationResponse::rejected("prompt is required")),
        );
    }

    match state.generator.generate(&req).await {
        Ok(flow) => {
            tracing::info!(project_id = %req.project_id, "Generated flow template");
            (StatusCode::OK, json!(GenerationResponse::ok(flow)))
        }
        Err(GenerationError::Rejected { message }) => {
            tracing::info!(project_id = %req.project_id, message = %message, "Generation rejected");
            (StatusCode::OK, json!(GenerationResponse::rejected(message)))
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string())),
    }
}

pub async fn create_flow_inner(
    state: &HttpState,
    req: CreateFlowRequest,
) -> (StatusCode, serde_json::Value) {
    if req.project_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, error_body("projectId is required"));
    }

    match state.store.create(&req).await {
        Ok(flow) => {
            tracing::info!(flow_id = %flow.id, project_id = %flow.project_id, "Flow created");
            (StatusCode::CREATED, json!(flow))
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string())),
    }
}

pub fn get_flow_inner(state: &HttpState, id: &str) -> (StatusCode, serde_json::Value) {
    match state.store.get(id) {
        Some(flow) => (StatusCode::OK, json!(flow)),
        None => (
            StatusCode::NOT_FOUND,
            error_body(format!("flow {} not found", id)),
        ),
    }
}

pub fn update_flow_inner(
    state: &HttpState,
    id: &str,
    op: FlowOperation,
) -> (StatusCode, serde_json::Value) {
    match state.store.apply(id, &op) {
        Ok(flow) => {
            tracing::info!(flow_id = %flow.id, "Flow updated");
            (StatusCode::OK, json!(flow))
        }
        Err(e @ PersistenceError::NotFound { .. }) => {
            (StatusCode::NOT_FOUND, error_body(e.to_string()))
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string())),
    }
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state);
    (status, Json(body))
}

pub async fn generate_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<GenerationRequest>,
) -> impl IntoResponse {
    let (status, body) = generate_inner(&state, req).await;
    (status, Json(body))
}

pub async fn create_flow_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<CreateFlowRequest>,
) -> impl IntoResponse {
    let (status, body) = create_flow_inner(&state, req).await;
    (status, Json(body))
}

pub async fn get_flow_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = get_flow_inner(&state, &id);
    (status, Json(body))
}

pub async fn update_flow_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(op): Json<FlowOperation>,
) -> impl IntoResponse {
    let (status, body) = update_flow_inner(&state, &id, op);
    (status, Json(body))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use invent_core::models::{ImportFlowRequest, SchemaVersion, TriggerDefinition};

    fn generation_request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            project_id: "proj-1".to_string(),
            user_id: "user-1".to_string(),
            auto_save: false,
            auto_enable: false,
        }
    }

    #[test]
    fn test_health_reports_flow_count() {
        let state = HttpState::default();
        let (status, body) = health_inner(&state);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["generator"], "canned");
        assert_eq!(body["flows"], 0);
    }

    #[tokio::test]
    async fn test_generate_inner_success() {
        let state = HttpState::default();
        let (status, body) = generate_inner(&state, generation_request("daily report")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["flow"]["template"]["displayName"], "AI Generated: daily report");
        assert_eq!(body["flow"]["template"]["schemaVersion"], 1);
    }

    #[tokio::test]
    async fn test_generate_inner_rejection_is_success_false() {
        let state = HttpState::default();
        let (status, body) = generate_inner(&state, generation_request("[fail]")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_generate_inner_blank_prompt_is_bad_request() {
        let state = HttpState::default();
        let (status, _) = generate_inner(&state, generation_request("  ")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_create_then_update_flow() {
        let state = HttpState::default();
        let (status, created) = create_flow_inner(
            &state,
            CreateFlowRequest::new("proj-1", "Untitled", None),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let op = FlowOperation::ImportFlow(ImportFlowRequest {
            display_name: "Daily Report Bot".to_string(),
            trigger: TriggerDefinition::empty(),
            schema_version: SchemaVersion::Number(1),
        });
        let (status, updated) = update_flow_inner(&state, &id, op);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["version"]["displayName"], "Daily Report Bot");
        assert_eq!(updated["version"]["state"], "DRAFT");

        let (status, fetched) = get_flow_inner(&state, &id);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["version"]["displayName"], "Daily Report Bot");
    }

    #[tokio::test]
    async fn test_create_requires_project() {
        let state = HttpState::default();
        let (status, body) =
            create_flow_inner(&state, CreateFlowRequest::new(" ", "Untitled", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[test]
    fn test_unknown_flow_is_404() {
        let state = HttpState::default();
        let (status, _) = get_flow_inner(&state, "missing");
        assert_eq!(status, StatusCode::NOT_FOUND);

        let op = FlowOperation::ImportFlow(ImportFlowRequest {
            display_name: "x".to_string(),
            trigger: TriggerDefinition::empty(),
            schema_version: SchemaVersion::Number(1),
        });
        let (status, _) = update_flow_inner(&state, "missing", op);
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
