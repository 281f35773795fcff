//! One builder per supported task kind, all producing the same executable
//! shape.
//!
//! Builders run at worker start: they compile the declarative task into a
//! [`TaskFn`] closure and register any child workflows and activities they
//! need into the [`Registry`]. At run time the sequence executor drives
//! the closures in declaration order under the engine's deterministic
//! context.

pub mod call_http;
pub mod do_task;
pub mod fork;
pub mod listen;
pub mod raise;
pub mod run;
pub mod set;
pub mod switch;
pub mod wait;

pub use do_task::DoTaskBuilder;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::attributes::decode_search_attributes;
use crate::document::{SchemaDef, Task, TaskBase, TaskKind};
use crate::engine::{Registry, WorkflowCtx, WorkflowError};
use crate::expr;
use crate::state::State;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("unsupported task type '{kind}' for task '{task}'")]
    UnsupportedTask { task: String, kind: String },

    #[error("multiple switch statements without when: {0}")]
    MultipleDefaults(String),

    #[error("no listen task configured: {0}")]
    NoEvents(String),

    #[error("invalid listen event for task '{task}': {detail}")]
    InvalidEventFilter { task: String, detail: String },

    #[error("invalid metadata.timeout for task '{task}': {detail}")]
    InvalidTimeout { task: String, detail: String },

    #[error("invalid input schema for '{name}': {detail}")]
    InvalidSchema { name: String, detail: String },

    #[error("error building task '{task}': {source}")]
    Nested {
        task: String,
        #[source]
        source: Box<BuildError>,
    },
}

/// Which task kind produced an output, for downstream introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    Do,
    Set,
    Wait,
    Switch,
    Fork,
    CallHttp,
    Run,
    Listen,
    Raise,
}

/// A task result tagged with its producing kind. `export.as` stores the
/// `data` payload under the exported key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    pub data: Value,
}

impl TaskOutput {
    pub fn new(kind: OutputKind, data: Value) -> Self {
        Self { kind, data }
    }
}

/// The uniform executable shape: `(ctx, input, state) -> (state, output)`.
/// State is threaded by value; a task that fails forfeits its state and
/// aborts the enclosing sequence.
pub type TaskFn = Arc<
    dyn Fn(WorkflowCtx, Value, State) -> BoxFuture<'static, Result<(State, TaskOutput), WorkflowError>>
        + Send
        + Sync,
>;

/// Compile-time information shared by every builder in a document.
#[derive(Clone)]
pub struct CompileContext {
    /// Activity start-to-close timeout, from `timeout.after` or default.
    pub timeout: Duration,
    /// Environment entries seeded into fresh state at workflow start.
    pub env: Arc<Vec<(String, String)>>,
    /// Document-level input schema, compiled once.
    pub input_schema: Option<Arc<jsonschema::Validator>>,
}

impl CompileContext {
    pub fn new(
        timeout: Duration,
        env: HashMap<String, String>,
        input_schema: Option<&SchemaDef>,
    ) -> Result<Self, BuildError> {
        let input_schema = match input_schema {
            Some(schema) => Some(Arc::new(compile_schema(schema, "workflow input")?)),
            None => None,
        };

        let mut env: Vec<_> = env.into_iter().collect();
        env.sort();

        Ok(Self {
            timeout,
            env: Arc::new(env),
            input_schema,
        })
    }
}

pub trait TaskBuilder {
    fn task_name(&self) -> &str;

    fn base(&self) -> &TaskBase;

    /// Compile into the executable closure, registering any child
    /// workflows and activities along the way.
    fn build(&self, registry: &mut Registry) -> Result<TaskFn, BuildError>;

    /// Evaluate the task's `if` gate against the current state.
    fn should_run(&self, state: &State) -> Result<bool, WorkflowError> {
        check_if_statement(self.base().r#if.as_deref(), state)
    }
}

/// Factory: create the right builder for the task kind, or die trying.
pub fn new_task_builder(
    key: &str,
    task: &Task,
    cctx: &CompileContext,
) -> Result<Box<dyn TaskBuilder>, BuildError> {
    match &task.kind {
        TaskKind::Do(do_task) => Ok(Box::new(DoTaskBuilder::new(
            key.to_string(),
            task.base.clone(),
            do_task.r#do.clone(),
            cctx.clone(),
        ))),
        TaskKind::Fork(fork) => Ok(Box::new(fork::ForkTaskBuilder::new(
            key.to_string(),
            task.base.clone(),
            fork.fork.clone(),
            cctx.clone(),
        ))),
        TaskKind::Call(call) => Ok(Box::new(call_http::CallHttpTaskBuilder::new(
            key.to_string(),
            task.base.clone(),
            call.with.clone(),
        ))),
        TaskKind::Set(set) => Ok(Box::new(set::SetTaskBuilder::new(
            key.to_string(),
            task.base.clone(),
            set.set.clone(),
        ))),
        TaskKind::Wait(wait) => Ok(Box::new(wait::WaitTaskBuilder::new(
            key.to_string(),
            task.base.clone(),
            wait.wait,
        ))),
        TaskKind::Switch(switch) => Ok(Box::new(switch::SwitchTaskBuilder::new(
            key.to_string(),
            task.base.clone(),
            switch.switch.clone(),
        ))),
        TaskKind::Run(run) => Ok(Box::new(run::RunTaskBuilder::new(
            key.to_string(),
            task.base.clone(),
            run.run.clone(),
        ))),
        TaskKind::Listen(listen) => Ok(Box::new(listen::ListenTaskBuilder::new(
            key.to_string(),
            task.base.clone(),
            listen.listen.clone(),
        ))),
        TaskKind::Raise(raise) => Ok(Box::new(raise::RaiseTaskBuilder::new(
            key.to_string(),
            task.base.clone(),
            raise.raise.clone(),
        ))),
        TaskKind::Unknown(map) => Err(BuildError::UnsupportedTask {
            task: key.to_string(),
            kind: map.keys().cloned().collect::<Vec<_>>().join(","),
        }),
    }
}

/// Evaluate an `if` expression against state. Absent means run. The
/// response can be a boolean, `"true"` (case-insensitive) or `"1"`.
pub fn check_if_statement(expr_str: Option<&str>, state: &State) -> Result<bool, WorkflowError> {
    let Some(expr_str) = expr_str else {
        return Ok(true);
    };

    let result = expr::evaluate_str(expr_str, &state.as_map()).map_err(|err| {
        // A parsing error here is not recoverable by retrying
        WorkflowError::non_retryable("Error parsing if statement", "If statement error")
            .with_details(Value::String(err.to_string()))
    })?;

    match result {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(s.eq_ignore_ascii_case("true") || s == "1"),
        _ => Err(WorkflowError::non_retryable(
            "If statement response type unknown",
            "If statement error",
        )),
    }
}

/// Apply the task's `metadata.searchAttributes` as one atomic upsert
/// against the current execution.
pub fn parse_metadata(ctx: &WorkflowCtx, base: &TaskBase) -> Result<(), WorkflowError> {
    let Some(declared) = base.search_attributes() else {
        return Ok(());
    };

    let attrs = decode_search_attributes(declared)
        .map_err(|err| WorkflowError::non_retryable(err.to_string(), "Search attribute error"))?;

    let mut updates = Vec::with_capacity(attrs.len());
    for (name, attr) in attrs {
        let update = attr.to_update(&name).map_err(|err| {
            WorkflowError::non_retryable(
                format!("error setting search attribute: {err}"),
                "Search attribute error",
            )
        })?;
        updates.push(update);
    }

    if updates.is_empty() {
        return Ok(());
    }

    ctx.upsert_search_attributes(updates)
}

/// Run the recursive interpolation under the engine's side-effect
/// primitive: builtins like `uuid` are non-deterministic, so the whole
/// evaluated tree is memoized into history.
pub(crate) async fn evaluate_obj_deterministic(
    ctx: &WorkflowCtx,
    node: &Value,
    state: &State,
) -> Result<Value, WorkflowError> {
    let node = node.clone();
    let doc = state.as_map();
    ctx.side_effect(Box::new(move || {
        expr::traverse_and_evaluate(&node, &doc).map_err(WorkflowError::from)
    }))
    .await
}

/// Compose child workflow names, e.g. `workflow_fork_<task>_<branch>`.
pub fn child_workflow_name(prefix: &str, parts: &[&str]) -> String {
    let mut name = format!("workflow_{prefix}");
    for part in parts {
        name.push('_');
        name.push_str(part);
    }
    name
}

pub(crate) fn compile_schema(
    schema: &SchemaDef,
    name: &str,
) -> Result<jsonschema::Validator, BuildError> {
    jsonschema::Validator::new(&schema.document).map_err(|err| BuildError::InvalidSchema {
        name: name.to_string(),
        detail: err.to_string(),
    })
}

/// Validate a payload against a compiled schema, failing non-retryably
/// with the schema-violation detail preserved.
pub(crate) fn validate_input_schema(
    validator: &jsonschema::Validator,
    input: &Value,
) -> Result<(), WorkflowError> {
    let violations: Vec<String> = validator.iter_errors(input).map(|e| e.to_string()).collect();
    if violations.is_empty() {
        return Ok(());
    }

    Err(WorkflowError::non_retryable(
        "Workflow input did not meet JSON schema specification",
        "Validation",
    )
    .with_details(serde_json::json!(violations)))
}
