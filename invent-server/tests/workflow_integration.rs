//! End-to-end tests: orchestrator with HTTP clients against the dev backend
//!
//! Each test binds the backend on an ephemeral port, so the whole path runs:
//! reqwest client, JSON wire format, axum handlers, in-memory store.

use invent_core::{
    InventConfig, InventOrchestrator, PersistenceError, ProjectContext, StartOutcome,
    WorkflowError, WorkflowState,
};
use invent_server::http::{start_http_server, HttpState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

struct Backend {
    state: Arc<HttpState>,
    url: String,
    shutdown: broadcast::Sender<()>,
}

impl Backend {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind ephemeral port");
        let url = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(HttpState::default());
        let (shutdown, _rx) = broadcast::channel(1);

        let server_state = state.clone();
        let server_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(listener, server_state, server_shutdown).await {
                eprintln!("dev backend error: {}", e);
            }
        });

        Self {
            state,
            url,
            shutdown,
        }
    }

    fn config(&self) -> InventConfig {
        let mut config = InventConfig::default();
        config.generation.base_url = self.url.clone();
        config.generation.max_retries = 0;
        config.flows.base_url = self.url.clone();
        config.flows.max_retries = 0;
        config
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

fn ctx() -> ProjectContext {
    ProjectContext::new("proj-1", "user-1")
}

#[tokio::test]
async fn test_prompt_to_persisted_flow_over_http() {
    let backend = Backend::start().await;
    let callbacks = Arc::new(AtomicUsize::new(0));
    let counter = callbacks.clone();

    let orchestrator = InventOrchestrator::from_config(&backend.config())
        .unwrap()
        .on_success(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let outcome = orchestrator.submit(&ctx(), "send me a daily report").await;

    let flow = match outcome {
        StartOutcome::Completed(flow) => flow,
        other => panic!("Expected completed workflow, got {:?}", other),
    };
    assert_eq!(flow.display_name(), "AI Generated: send me a daily report");
    assert_eq!(flow.project_id, "proj-1");
    assert!(flow.is_draft());
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);

    let stored = backend.state.store.get(&flow.id).expect("flow should be stored");
    assert_eq!(stored.display_name(), flow.display_name());
    assert_eq!(backend.state.store.import_calls(), 1);
    assert_eq!(backend.state.generator.call_count(), 1);
}

#[tokio::test]
async fn test_success_false_is_a_generation_failure() {
    let backend = Backend::start().await;
    let orchestrator = InventOrchestrator::from_config(&backend.config()).unwrap();

    let outcome = orchestrator.submit(&ctx(), "please [fail]").await;

    assert!(matches!(outcome.error(), Some(WorkflowError::GenerationFailed(_))));
    assert!(backend.state.store.is_empty());
    assert!(matches!(orchestrator.state(), WorkflowState::Failed { .. }));
}

#[tokio::test]
async fn test_import_failure_over_http_leaves_draft() {
    let backend = Backend::start().await;
    backend.state.store.set_fail_imports(true);
    let orchestrator = InventOrchestrator::from_config(&backend.config()).unwrap();

    let outcome = orchestrator.submit(&ctx(), "send me a daily report").await;

    assert!(matches!(
        outcome.error(),
        Some(WorkflowError::PersistenceFailed(PersistenceError::Api { code: 500, .. }))
    ));
    let flows = backend.state.store.list();
    assert_eq!(flows.len(), 1);
    assert!(flows[0].is_draft());
}

#[tokio::test]
async fn test_create_from_scratch_over_http() {
    let backend = Backend::start().await;
    let orchestrator = InventOrchestrator::from_config(&backend.config())
        .unwrap()
        .with_folder_resolver(|| async { Some("Ops".to_string()) });

    let outcome = orchestrator.create_from_scratch(&ctx()).await;

    let flow = outcome.flow().expect("scratch flow should be created");
    assert_eq!(flow.display_name(), "Untitled");
    assert_eq!(flow.folder_id.as_deref(), Some("Ops"));
    assert_eq!(backend.state.generator.call_count(), 0);
}

#[tokio::test]
async fn test_unreachable_backend_fails_cleanly() {
    let mut config = InventConfig::default();
    config.generation.base_url = "http://127.0.0.1:1".to_string();
    config.generation.max_retries = 1;
    config.generation.retry_delay_ms = 10;
    let orchestrator = InventOrchestrator::from_config(&config).unwrap();

    let outcome = orchestrator.submit(&ctx(), "daily report").await;

    assert!(matches!(outcome.error(), Some(WorkflowError::GenerationFailed(_))));
    assert!(!orchestrator.is_building());
}
