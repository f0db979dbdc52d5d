//! Request orchestrator: sequences generation and persistence for one view.
//!
//! Two independent actions share one orchestrator:
//! - **build**: prompt → `GenerationClient` → create draft → import template
//! - **scratch**: create an empty draft with a placeholder name
//!
//! Each action owns a state slot published through a `watch` channel. Claiming
//! a slot is a single atomic check-and-set, so at most one invocation of each
//! action is in flight. Every network call is bounded by a timeout and raced
//! against the invocation's cancellation token.

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::InventConfig;
use crate::error::{InventError, WorkflowError};
use crate::flows::{FlowPersistence, HttpFlowClient, PersistenceError};
use crate::generation::{GenerationClient, GenerationError, GenerationRequest, HttpGenerationClient};
use crate::models::{CreateFlowRequest, Flow, ProjectContext};
use crate::notify::{Notification, Notifier, TracingNotifier};

pub type SuccessCallback = Box<dyn Fn(&Flow) + Send + Sync>;

/// Supplies the folder a new flow is created in, if any.
///
/// Implemented for any `Fn() -> impl Future<Output = Option<String>>`.
#[async_trait]
pub trait FolderResolver: Send + Sync {
    async fn folder_name(&self) -> Option<String>;
}

#[async_trait]
impl<F, Fut> FolderResolver for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    async fn folder_name(&self) -> Option<String> {
        (self)().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Generating,
    Persisting,
    Succeeded { flow_id: String },
    Failed { message: String },
}

impl WorkflowState {
    pub fn is_pending(&self) -> bool {
        matches!(self, WorkflowState::Generating | WorkflowState::Persisting)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Succeeded { .. } | WorkflowState::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    BlankPrompt,
    AlreadyPending,
}

#[derive(Debug)]
pub enum StartOutcome {
    /// Nothing was sent; the orchestrator state is unchanged.
    Ignored(IgnoreReason),
    Completed(Flow),
    Failed(WorkflowError),
}

impl StartOutcome {
    pub fn flow(&self) -> Option<&Flow> {
        match self {
            StartOutcome::Completed(flow) => Some(flow),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&WorkflowError> {
        match self {
            StartOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, StartOutcome::Ignored(_))
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub auto_save: bool,
    pub auto_enable: bool,
    pub generation_timeout: Duration,
    pub persistence_timeout: Duration,
    /// Display name for flows created from scratch.
    pub untitled_name: String,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            auto_save: false,
            auto_enable: false,
            generation_timeout: Duration::from_secs(60),
            persistence_timeout: Duration::from_secs(30),
            untitled_name: "Untitled".to_string(),
        }
    }
}

impl WorkflowOptions {
    pub fn from_config(config: &InventConfig) -> Self {
        Self {
            auto_save: config.generation.auto_save,
            auto_enable: config.generation.auto_enable,
            generation_timeout: Duration::from_secs(config.generation.timeout_seconds),
            persistence_timeout: Duration::from_secs(config.flows.timeout_seconds),
            untitled_name: config.flows.untitled_name.clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// State slots
// ============================================================================

struct Slot {
    state: watch::Sender<WorkflowState>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Slot {
    fn new() -> Self {
        let (state, _rx) = watch::channel(WorkflowState::Idle);
        Self {
            state,
            cancel: Mutex::new(None),
        }
    }

    /// Move a non-pending slot to `first`. A terminal state is implicitly
    /// reset to `Idle` by the claim.
    fn claim(&self, first: WorkflowState) -> Option<Claim<'_>> {
        let mut cancel = lock(&self.cancel);
        let claimed = self.state.send_if_modified(|state| {
            if state.is_pending() {
                return false;
            }
            *state = first;
            true
        });
        if !claimed {
            return None;
        }

        let token = CancellationToken::new();
        *cancel = Some(token.clone());
        Some(Claim {
            slot: self,
            token,
            finished: false,
        })
    }

    fn release(&self, terminal: WorkflowState) {
        let mut cancel = lock(&self.cancel);
        *cancel = None;
        self.state.send_replace(terminal);
    }

    fn cancel(&self) -> bool {
        match lock(&self.cancel).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn reset(&self) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                *state = WorkflowState::Idle;
                true
            } else {
                false
            }
        });
    }

    fn current(&self) -> WorkflowState {
        self.state.borrow().clone()
    }
}

/// An in-flight invocation. Dropping it unfinished marks the slot failed so
/// an abandoned future cannot leave the action pending forever.
struct Claim<'a> {
    slot: &'a Slot,
    token: CancellationToken,
    finished: bool,
}

impl Claim<'_> {
    fn advance(&self, next: WorkflowState) {
        self.slot.state.send_replace(next);
    }

    fn finish(mut self, terminal: WorkflowState) {
        self.finished = true;
        self.slot.release(terminal);
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.slot.release(WorkflowState::Failed {
                message: "invocation abandoned".to_string(),
            });
        }
    }
}

async fn bounded<T, E, Fut>(
    token: &CancellationToken,
    limit: Duration,
    fut: Fut,
    on_timeout: E,
    on_cancel: E,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(on_cancel),
        res = tokio::time::timeout(limit, fut) => res.unwrap_or(Err(on_timeout)),
    }
}

// ============================================================================
// InventOrchestrator
// ============================================================================

pub struct InventOrchestrator {
    generator: Arc<dyn GenerationClient>,
    flows: Arc<dyn FlowPersistence>,
    notifier: Arc<dyn Notifier>,
    on_success: SuccessCallback,
    folder_resolver: Option<Arc<dyn FolderResolver>>,
    options: WorkflowOptions,
    prompt: Mutex<String>,
    build: Slot,
    scratch: Slot,
}

impl InventOrchestrator {
    pub fn new(generator: Arc<dyn GenerationClient>, flows: Arc<dyn FlowPersistence>) -> Self {
        Self {
            generator,
            flows,
            notifier: Arc::new(TracingNotifier),
            on_success: Box::new(|_| {}),
            folder_resolver: None,
            options: WorkflowOptions::default(),
            prompt: Mutex::new(String::new()),
            build: Slot::new(),
            scratch: Slot::new(),
        }
    }

    /// HTTP-backed orchestrator for the configured backend.
    pub fn from_config(config: &InventConfig) -> Result<Self, InventError> {
        let generator = HttpGenerationClient::new(&config.generation)?;
        let flows = HttpFlowClient::new(&config.flows)?;

        Ok(Self::new(Arc::new(generator), Arc::new(flows))
            .with_options(WorkflowOptions::from_config(config)))
    }

    /// Called once with the final flow after every successful action.
    pub fn on_success(mut self, callback: impl Fn(&Flow) + Send + Sync + 'static) -> Self {
        self.on_success = Box::new(callback);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_folder_resolver(mut self, resolver: impl FolderResolver + 'static) -> Self {
        self.folder_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_prompt(&self, prompt: impl Into<String>) {
        *lock(&self.prompt) = prompt.into();
    }

    pub fn prompt(&self) -> String {
        lock(&self.prompt).clone()
    }

    pub fn state(&self) -> WorkflowState {
        self.build.current()
    }

    pub fn scratch_state(&self) -> WorkflowState {
        self.scratch.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.build.state.subscribe()
    }

    pub fn subscribe_scratch(&self) -> watch::Receiver<WorkflowState> {
        self.scratch.state.subscribe()
    }

    pub fn is_building(&self) -> bool {
        self.state().is_pending()
    }

    pub fn is_creating_from_scratch(&self) -> bool {
        self.scratch_state().is_pending()
    }

    /// Abort the in-flight build. Returns false when nothing was running.
    pub fn cancel(&self) -> bool {
        self.build.cancel()
    }

    pub fn cancel_scratch(&self) -> bool {
        self.scratch.cancel()
    }

    /// Return both actions from a terminal state to `Idle`.
    pub fn reset(&self) {
        self.build.reset();
        self.scratch.reset();
    }

    pub async fn submit(&self, context: &ProjectContext, prompt: impl Into<String>) -> StartOutcome {
        if self.is_building() {
            return StartOutcome::Ignored(IgnoreReason::AlreadyPending);
        }
        self.set_prompt(prompt);
        self.start(context).await
    }

    /// Generate a flow from the current prompt and persist it.
    pub async fn start(&self, context: &ProjectContext) -> StartOutcome {
        let prompt = self.prompt();
        if prompt.trim().is_empty() {
            tracing::debug!("Ignoring start: prompt is blank");
            return StartOutcome::Ignored(IgnoreReason::BlankPrompt);
        }

        let Some(claim) = self.build.claim(WorkflowState::Generating) else {
            tracing::debug!("Ignoring start: generation already in flight");
            return StartOutcome::Ignored(IgnoreReason::AlreadyPending);
        };

        tracing::info!(
            project_id = %context.project_id,
            generator = self.generator.name(),
            "Starting flow generation"
        );

        let result = self.run_build(context, &prompt, &claim).await;
        match result {
            Ok(flow) => {
                tracing::info!(flow_id = %flow.id, display_name = %flow.display_name(), "Generated flow persisted");
                claim.finish(WorkflowState::Succeeded {
                    flow_id: flow.id.clone(),
                });
                lock(&self.prompt).clear();
                (self.on_success)(&flow);
                self.notifier.notify(Notification::flow_created());
                StartOutcome::Completed(flow)
            }
            Err(e) => self.fail(claim, e),
        }
    }

    /// Create an empty draft flow without calling the generator.
    pub async fn create_from_scratch(&self, context: &ProjectContext) -> StartOutcome {
        let Some(claim) = self.scratch.claim(WorkflowState::Persisting) else {
            tracing::debug!("Ignoring create-from-scratch: already in flight");
            return StartOutcome::Ignored(IgnoreReason::AlreadyPending);
        };

        let folder_name = self.resolve_folder(&claim.token).await;
        let request = CreateFlowRequest::new(
            context.project_id.clone(),
            self.options.untitled_name.clone(),
            folder_name,
        );

        let result = self.persist(&claim.token, self.flows.create(&request)).await;
        match result {
            Ok(flow) => {
                tracing::info!(flow_id = %flow.id, "Created flow from scratch");
                claim.finish(WorkflowState::Succeeded {
                    flow_id: flow.id.clone(),
                });
                (self.on_success)(&flow);
                StartOutcome::Completed(flow)
            }
            Err(e) => self.fail(claim, e.into()),
        }
    }

    async fn run_build(
        &self,
        context: &ProjectContext,
        prompt: &str,
        claim: &Claim<'_>,
    ) -> Result<Flow, WorkflowError> {
        let request = GenerationRequest::new(
            prompt,
            context,
            self.options.auto_save,
            self.options.auto_enable,
        )?;
        let folder_name = self.resolve_folder(&claim.token).await;

        let limit = self.options.generation_timeout;
        let generated = bounded(
            &claim.token,
            limit,
            self.generator.generate(&request),
            GenerationError::Timeout { limit },
            GenerationError::Cancelled,
        )
        .await?;
        let template = generated.resolved_template(prompt);

        claim.advance(WorkflowState::Persisting);

        // The draft is always created empty; the template goes in afterwards.
        let create = CreateFlowRequest::new(
            context.project_id.clone(),
            template.display_name.clone(),
            folder_name,
        );
        let created = self.persist(&claim.token, self.flows.create(&create)).await?;
        tracing::debug!(flow_id = %created.id, "Created draft flow");

        match self
            .persist(&claim.token, self.flows.import_template(&created.id, &template))
            .await
        {
            Ok(flow) => Ok(flow),
            Err(e) => {
                tracing::error!(
                    flow_id = %created.id,
                    error = %e,
                    "Template import failed, draft flow left in place"
                );
                Err(e.into())
            }
        }
    }

    async fn persist<Fut>(&self, token: &CancellationToken, fut: Fut) -> Result<Flow, PersistenceError>
    where
        Fut: Future<Output = Result<Flow, PersistenceError>>,
    {
        let limit = self.options.persistence_timeout;
        bounded(
            token,
            limit,
            fut,
            PersistenceError::Timeout { limit },
            PersistenceError::Cancelled,
        )
        .await
    }

    async fn resolve_folder(&self, token: &CancellationToken) -> Option<String> {
        let resolver = self.folder_resolver.as_ref()?;
        tokio::select! {
            name = resolver.folder_name() => name,
            _ = token.cancelled() => None,
        }
    }

    fn fail(&self, claim: Claim<'_>, error: WorkflowError) -> StartOutcome {
        tracing::warn!(error = %error, cancelled = error.is_cancelled(), "Workflow invocation failed");
        claim.finish(WorkflowState::Failed {
            message: error.to_string(),
        });
        self.notifier.notify(Notification::internal_error());
        StartOutcome::Failed(error)
    }
}

// ============================================================================
// TESTS
// ============================================================================
