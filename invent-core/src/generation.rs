//! Generation client: turns a natural-language prompt into a flow template.
//!
//! Provides a `GenerationClient` trait with implementations for:
//! - **HTTP**: the backend generation endpoint
//! - **Canned**: deterministic in-memory generator for tests and the dev server

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::GenerationConfig;
use crate::error::WorkflowError;
use crate::models::{
    prompt_fallback_name, FlowTemplate, GeneratedFlow, ProjectContext, SchemaVersion,
    TriggerDefinition,
};

/// Path of the generation endpoint, relative to the configured base URL.
pub const GENERATE_PATH: &str = "/v1/invent/generate";

/// Prompts containing this marker are rejected by the canned generator.
pub const CANNED_FAIL_MARKER: &str = "[fail]";

// ============================================================================
// GenerationClient trait
// ============================================================================

#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate a flow template for the request. One call per invocation.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedFlow, GenerationError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Generation rejected: {message}")]
    Rejected { message: String },

    #[error("Invalid response: {0}")]
    MalformedResponse(String),

    #[error("Timed out after {limit:?}")]
    Timeout { limit: Duration },

    #[error("Cancelled")]
    Cancelled,
}

impl GenerationError {
    /// True when the request never reached the server.
    pub fn is_connect(&self) -> bool {
        matches!(self, GenerationError::Http(e) if e.is_connect())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    pub project_id: String,
    pub user_id: String,
    #[serde(default)]
    pub auto_save: bool,
    #[serde(default)]
    pub auto_enable: bool,
}

impl GenerationRequest {
    /// Build a request, rejecting prompts that are blank after trimming.
    pub fn new(
        prompt: &str,
        context: &ProjectContext,
        auto_save: bool,
        auto_enable: bool,
    ) -> Result<Self, WorkflowError> {
        if prompt.trim().is_empty() {
            return Err(WorkflowError::Validation("prompt must not be blank".to_string()));
        }
        Ok(Self {
            prompt: prompt.to_string(),
            project_id: context.project_id.clone(),
            user_id: context.user_id.clone(),
            auto_save,
            auto_enable,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<GeneratedFlow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GenerationResponse {
    pub fn ok(flow: GeneratedFlow) -> Self {
        Self {
            success: true,
            flow: Some(flow),
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            flow: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
}

// ============================================================================
// HttpGenerationClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    client: Client,
    base_url: String,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl HttpGenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    async fn generate_once(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedFlow, GenerationError> {
        let url = format!("{}{}", self.base_url, GENERATE_PATH);

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|e| e.message.or(e.error))
                .unwrap_or(body);

            tracing::error!(code = status.as_u16(), message = %message, "Generation API error");

            return Err(GenerationError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let parsed: GenerationResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        if !parsed.success {
            let message = parsed
                .message
                .unwrap_or_else(|| "generation reported failure".to_string());
            tracing::warn!(message = %message, "Generation endpoint returned success=false");
            return Err(GenerationError::Rejected { message });
        }

        parsed
            .flow
            .ok_or_else(|| GenerationError::MalformedResponse("missing flow".to_string()))
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedFlow, GenerationError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(
            retry_strategy,
            || self.generate_once(request),
            GenerationError::is_connect,
        )
        .await
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// CannedGenerationClient
// ============================================================================

#[derive(Debug, Clone)]
enum CannedMode {
    Echo,
    Fixed(GeneratedFlow),
    Reject(String),
}

/// Requests kept by [`CannedGenerationClient::calls`]; older ones are dropped.
pub const CANNED_HISTORY_LIMIT: usize = 64;

/// Deterministic generator. By default it echoes the prompt into an empty
/// template; it can be pinned to a fixed result or to always reject.
/// Counts every request and keeps the most recent ones.
#[derive(Debug)]
pub struct CannedGenerationClient {
    mode: CannedMode,
    delay: Option<Duration>,
    calls: Mutex<VecDeque<GenerationRequest>>,
    call_count: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for CannedGenerationClient {
    fn default() -> Self {
        Self::with_mode(CannedMode::Echo)
    }
}

impl CannedGenerationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returning(flow: GeneratedFlow) -> Self {
        Self::with_mode(CannedMode::Fixed(flow))
    }

    pub fn rejecting(message: impl Into<String>) -> Self {
        Self::with_mode(CannedMode::Reject(message.into()))
    }

    fn with_mode(mode: CannedMode) -> Self {
        Self {
            mode,
            delay: None,
            calls: Mutex::new(VecDeque::new()),
            call_count: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The most recent requests, oldest first.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Total requests received, including ones no longer in [`Self::calls`].
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn echo(prompt: &str) -> GeneratedFlow {
        GeneratedFlow {
            name: None,
            template: FlowTemplate {
                display_name: prompt_fallback_name(prompt),
                trigger: TriggerDefinition::empty(),
                schema_version: SchemaVersion::default(),
            },
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationClient for CannedGenerationClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedFlow, GenerationError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            if calls.len() == CANNED_HISTORY_LIMIT {
                calls.pop_front();
            }
            calls.push_back(request.clone());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.mode {
            CannedMode::Reject(message) => Err(GenerationError::Rejected {
                message: message.clone(),
            }),
            CannedMode::Fixed(flow) => Ok(flow.clone()),
            CannedMode::Echo if request.prompt.contains(CANNED_FAIL_MARKER) => {
                Err(GenerationError::Rejected {
                    message: "prompt requested a failure".to_string(),
                })
            }
            CannedMode::Echo => Ok(Self::echo(&request.prompt)),
        }
    }

    fn name(&self) -> &str {
        "canned"
    }
}

// ============================================================================
// TESTS
// ============================================================================
