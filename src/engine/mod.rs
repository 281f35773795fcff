//! The durable-execution engine capability surface.
//!
//! Task builders compile against these traits, not a concrete engine: a
//! deterministic workflow context (activities, child workflows, durable
//! sleep, side effects, signals, queries, updates, typed search
//! attributes), an activity context, and a schedule client. The bundled
//! [`local`] implementation runs the whole surface in-process on tokio for
//! development and tests; a production deployment binds the same traits to
//! a real durable engine.

pub mod local;
pub mod schedule;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::attributes::SearchAttributeUpdate;
use crate::state::State;

/// An application-level failure, mirroring the engine's application-error
/// shape: a message, a machine-readable code ("type"), retry behavior and
/// optional structured detail.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationError {
    pub message: String,
    pub code: String,
    pub non_retryable: bool,
    pub details: Option<Value>,
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for ApplicationError {}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error(transparent)]
    Application(#[from] ApplicationError),

    #[error("cancelled")]
    Cancelled,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("engine error: {0}")]
    Engine(String),
}

impl WorkflowError {
    /// A failure the engine must not retry (bad input, bad configuration).
    pub fn non_retryable(message: impl Into<String>, code: impl Into<String>) -> Self {
        WorkflowError::Application(ApplicationError {
            message: message.into(),
            code: code.into(),
            non_retryable: true,
            details: None,
        })
    }

    /// A failure eligible for the engine's default retry policy.
    pub fn retryable(message: impl Into<String>, code: impl Into<String>) -> Self {
        WorkflowError::Application(ApplicationError {
            message: message.into(),
            code: code.into(),
            non_retryable: false,
            details: None,
        })
    }

    pub fn with_details(self, details: Value) -> Self {
        match self {
            WorkflowError::Application(mut app) => {
                app.details = Some(details);
                WorkflowError::Application(app)
            }
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkflowError::Cancelled)
    }
}

impl From<crate::expr::ExpressionError> for WorkflowError {
    fn from(err: crate::expr::ExpressionError) -> Self {
        WorkflowError::retryable(err.to_string(), "Expression error")
    }
}

/// Options applied to activities scheduled from the current context.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    pub start_to_close: Duration,
    /// Human-readable marker shown against pending activities; the
    /// executor sets it to the current task key.
    pub summary: String,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close: crate::document::DEFAULT_WORKFLOW_TIMEOUT,
            summary: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionInfo {
    pub workflow_id: String,
    pub workflow_type: String,
    pub task_queue: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParentClosePolicy {
    /// Children are cancelled when the parent closes.
    #[default]
    Terminate,
    /// Children keep running after the parent closes.
    Abandon,
}

#[derive(Debug, Clone, Default)]
pub struct ChildWorkflowOptions {
    pub workflow_id: Option<String>,
    pub parent_close_policy: ParentClosePolicy,
}

/// Connection configuration for a real engine deployment. Credential
/// assembly and payload conversion happen outside this crate; the options
/// are carried so the binary can hand them to whichever backend it binds.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub address: String,
    pub namespace: String,
    pub api_key: Option<String>,
    pub tls: bool,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub converter_key_path: Option<String>,
}

pub type WorkflowCtx = Arc<dyn WorkflowContext>;
pub type ActivityCtx = Arc<dyn ActivityContext>;

/// A registered workflow body. `state` is `None` for a fresh top-level
/// execution and `Some` when invoked as a child carrying its parent's
/// cloned state.
pub type WorkflowFn = Arc<
    dyn Fn(WorkflowCtx, Value, Option<State>) -> BoxFuture<'static, Result<Value, WorkflowError>>
        + Send
        + Sync,
>;

/// A registered activity body: side-effectful, runs outside the
/// deterministic context.
pub type ActivityFn = Arc<
    dyn Fn(ActivityCtx, Value) -> BoxFuture<'static, Result<Value, WorkflowError>> + Send + Sync,
>;

pub type QueryHandler = Arc<dyn Fn() -> Result<Value, WorkflowError> + Send + Sync>;
pub type UpdateHandler = Arc<dyn Fn(Value) -> Result<Value, WorkflowError> + Send + Sync>;
pub type SideEffectFn = Box<dyn FnOnce() -> Result<Value, WorkflowError> + Send>;

/// Handle to a dispatched child workflow.
pub trait ChildWorkflowHandle: Send + Sync {
    fn workflow_id(&self) -> &str;
    /// Request cancellation; the child observes it at its next suspension
    /// point and resolves to [`WorkflowError::Cancelled`].
    fn cancel(&self);
    /// The child's result. May be called multiple times.
    fn result(&self) -> BoxFuture<'static, Result<Value, WorkflowError>>;
}

#[async_trait]
pub trait SignalChannel: Send + Sync {
    /// Receive the next payload sent to this named channel.
    async fn receive(&self) -> Option<Value>;
}

/// The deterministic workflow context. Everything non-deterministic a
/// workflow body needs goes through here so a real engine can record it
/// into history.
#[async_trait]
pub trait WorkflowContext: Send + Sync {
    fn info(&self) -> ExecutionInfo;

    fn activity_options(&self) -> ActivityOptions;
    fn set_activity_options(&self, options: ActivityOptions);

    async fn execute_activity(&self, name: &str, input: Value) -> Result<Value, WorkflowError>;

    /// Durable sleep. Resolves to `Err(Cancelled)` if the workflow is
    /// cancelled while sleeping.
    async fn sleep(&self, duration: Duration) -> Result<(), WorkflowError>;

    /// Run a possibly non-deterministic computation whose result is
    /// memoized into history so replays are deterministic.
    async fn side_effect(&self, f: SideEffectFn) -> Result<Value, WorkflowError>;

    fn start_child_workflow(
        &self,
        name: &str,
        input: Value,
        state: Option<State>,
        options: ChildWorkflowOptions,
    ) -> Result<Arc<dyn ChildWorkflowHandle>, WorkflowError>;

    fn signal_channel(&self, name: &str) -> Box<dyn SignalChannel>;

    fn set_query_handler(&self, name: &str, handler: QueryHandler) -> Result<(), WorkflowError>;
    fn set_update_handler(&self, name: &str, handler: UpdateHandler) -> Result<(), WorkflowError>;

    /// Apply a batch of typed search-attribute updates atomically to the
    /// current execution.
    fn upsert_search_attributes(
        &self,
        updates: Vec<SearchAttributeUpdate>,
    ) -> Result<(), WorkflowError>;
}

#[derive(Debug, Clone)]
pub struct ActivityInfo {
    pub start_to_close: Duration,
    pub summary: String,
}

#[async_trait]
pub trait ActivityContext: Send + Sync {
    fn info(&self) -> ActivityInfo;
    fn is_cancelled(&self) -> bool;
    /// Resolves when the activity is cancelled.
    async fn cancelled(&self);
}

/// Workflow and activity registrations, owned by the compile pass and
/// handed to the worker explicitly.
#[derive(Default)]
pub struct Registry {
    workflows: HashMap<String, WorkflowFn>,
    activities: HashMap<String, ActivityFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_workflow(&mut self, name: impl Into<String>, f: WorkflowFn) {
        self.workflows.insert(name.into(), f);
    }

    pub fn register_activity(&mut self, name: impl Into<String>, f: ActivityFn) {
        self.activities.insert(name.into(), f);
    }

    pub fn workflow(&self, name: &str) -> Option<WorkflowFn> {
        self.workflows.get(name).cloned()
    }

    pub fn activity(&self, name: &str) -> Option<ActivityFn> {
        self.activities.get(name).cloned()
    }

    pub fn has_workflow(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    pub fn workflow_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.workflows.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn activity_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.activities.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("workflows", &self.workflow_names())
            .field("activities", &self.activity_names())
            .finish()
    }
}
