//! The `do` task: deterministic in-order execution of a task list.
//!
//! Nested `do` tasks are not executed inline. Each one compiles into a
//! named child workflow (registered under its task key) so `switch`,
//! `fork` and `run` can invoke it; the enclosing sequence only runs the
//! non-`do` tasks it contains.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{
    compile_schema, new_task_builder, parse_metadata, BuildError, CompileContext, OutputKind,
    TaskBuilder, TaskFn, TaskOutput,
};
use crate::document::{FlowDirective, TaskBase, TaskKind, TaskList};
use crate::engine::{ActivityOptions, Registry, WorkflowCtx, WorkflowError, WorkflowFn};
use crate::state::State;

pub struct DoTaskBuilder {
    name: String,
    base: TaskBase,
    list: TaskList,
    cctx: CompileContext,
}

/// A compiled inline task: everything the executor needs per iteration.
struct CompiledTask {
    key: String,
    base: TaskBase,
    input_schema: Option<Arc<jsonschema::Validator>>,
    f: TaskFn,
}

impl DoTaskBuilder {
    pub fn new(name: String, base: TaskBase, list: TaskList, cctx: CompileContext) -> Self {
        Self {
            name,
            base,
            list,
            cctx,
        }
    }

    /// Compile the list. Nested `do` items register themselves as child
    /// workflows and contribute no inline task.
    fn compile(&self, registry: &mut Registry) -> Result<Vec<CompiledTask>, BuildError> {
        let mut tasks = Vec::new();

        for item in self.list.iter() {
            if let TaskKind::Do(do_task) = &item.task.kind {
                let nested = DoTaskBuilder::new(
                    item.key.clone(),
                    item.task.base.clone(),
                    do_task.r#do.clone(),
                    self.cctx.clone(),
                );
                nested.register(registry)?;
                continue;
            }

            let builder = new_task_builder(&item.key, &item.task, &self.cctx)?;
            let f = builder.build(registry).map_err(|err| BuildError::Nested {
                task: item.key.clone(),
                source: Box::new(err),
            })?;

            let input_schema = match item.task.base.input_schema() {
                Some(schema) => Some(Arc::new(compile_schema(schema, &item.key)?)),
                None => None,
            };

            debug!(key = %item.key, kind = item.task.kind.kind_name(), "Task detected");
            tasks.push(CompiledTask {
                key: item.key.clone(),
                base: item.task.base.clone(),
                input_schema,
                f,
            });
        }

        Ok(tasks)
    }

    /// Register this list as a named child workflow, unless it contains
    /// only other `do` lists (pure grouping registers nothing itself).
    pub fn register(&self, registry: &mut Registry) -> Result<(), BuildError> {
        let tasks = self.compile(registry)?;
        if tasks.is_empty() {
            debug!(
                workflow = %self.name,
                "Workflow exclusively made of do tasks - not registering as workflow"
            );
            return Ok(());
        }

        let f = self.workflow_fn(tasks);
        registry.register_workflow(self.name.clone(), f);
        Ok(())
    }

    /// Compile into an engine workflow body regardless of shape. The
    /// registrar uses this for the root list; fork uses it for branches.
    pub fn build_workflow(&self, registry: &mut Registry) -> Result<WorkflowFn, BuildError> {
        let tasks = self.compile(registry)?;
        Ok(self.workflow_fn(tasks))
    }

    fn executor(&self, tasks: Vec<CompiledTask>) -> SequenceExecutor {
        SequenceExecutor {
            name: Arc::from(self.name.as_str()),
            tasks: Arc::new(tasks),
            timeout: self.cctx.timeout,
            env: Arc::clone(&self.cctx.env),
            input_schema: self.cctx.input_schema.clone(),
        }
    }

    fn workflow_fn(&self, tasks: Vec<CompiledTask>) -> WorkflowFn {
        let executor = self.executor(tasks);
        Arc::new(move |ctx, input, state| {
            let executor = executor.clone();
            async move { executor.run(ctx, input, state).await }.boxed()
        })
    }
}

impl TaskBuilder for DoTaskBuilder {
    fn task_name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn build(&self, registry: &mut Registry) -> Result<TaskFn, BuildError> {
        let executor = self.executor(self.compile(registry)?);
        Ok(Arc::new(move |ctx, input, state| {
            let executor = executor.clone();
            async move {
                let branch_state = state.clone();
                let output = executor.run(ctx, input, Some(branch_state)).await?;
                Ok((state, TaskOutput::new(OutputKind::Do, output)))
            }
            .boxed()
        }))
    }
}

/// The sequence executor: drives compiled tasks in declaration order with
/// if-gates, input validation, metadata application, export and `then`
/// routing.
#[derive(Clone)]
struct SequenceExecutor {
    name: Arc<str>,
    tasks: Arc<Vec<CompiledTask>>,
    timeout: Duration,
    env: Arc<Vec<(String, String)>>,
    input_schema: Option<Arc<jsonschema::Validator>>,
}

impl SequenceExecutor {
    async fn run(
        self,
        ctx: WorkflowCtx,
        input: Value,
        state: Option<State>,
    ) -> Result<Value, WorkflowError> {
        info!(workflow = %self.name, "Running workflow");

        let mut state = match state {
            // A child invocation inherits its parent's state but reports
            // only its own exports
            Some(mut state) => {
                state.clear_output();
                state
            }
            None => self.fresh_state(&input)?,
        };

        debug!(timeout = ?self.timeout, "Setting activity options");
        ctx.set_activity_options(ActivityOptions {
            start_to_close: self.timeout,
            summary: String::new(),
        });

        let mut pending_target: Option<String> = None;

        for task in self.tasks.iter() {
            // Expressions can read the current task key via .data.task.name
            state.add_data_entry("task", json!({ "name": task.key }));

            if let Some(target) = &pending_target {
                if *target != task.key {
                    debug!(name = %task.key, target = %target, "Skipping task while seeking then target");
                    continue;
                }
                pending_target = None;
            }

            debug!(name = %task.key, "Check if task can be run");
            if !super::check_if_statement(task.base.r#if.as_deref(), &state)? {
                debug!(name = %task.key, "Skipping task as if statement resolved as false");
                continue;
            }

            if let Some(schema) = &task.input_schema {
                super::validate_input_schema(schema, &input)?;
            }

            parse_metadata(&ctx, &task.base)?;

            let mut options = ctx.activity_options();
            options.summary = task.key.clone();
            ctx.set_activity_options(options);

            info!(name = %task.key, "Running task");
            let (next_state, output) = (task.f)(Arc::clone(&ctx), input.clone(), state).await?;
            state = next_state;

            state.add_output(&task.base, output.data);

            match &task.base.then {
                None | Some(FlowDirective::Continue) => {}
                Some(directive) if directive.is_terminal() => {
                    debug!(name = %task.key, "Terminal flow directive - ending sequence");
                    break;
                }
                Some(FlowDirective::Target(target)) => {
                    debug!(name = %task.key, target = %target, "Recording then jump target");
                    pending_target = Some(target.clone());
                }
                Some(_) => unreachable!("terminal directives handled above"),
            }
        }

        if let Some(target) = pending_target {
            return Err(WorkflowError::non_retryable(
                format!("then target task not found: {target}"),
                "Flow directive error",
            ));
        }

        Ok(Value::Object(state.output))
    }

    /// Build the initial state for a top-level execution: seed env,
    /// validate the caller payload against the document schema.
    fn fresh_state(&self, input: &Value) -> Result<State, WorkflowError> {
        debug!("Creating new workflow state");
        let mut state = State::new();
        state.set_env(self.env.iter().cloned());

        if let Some(validator) = &self.input_schema {
            debug!("Validating input against schema");
            super::validate_input_schema(validator, input)?;
        }
        state.set_input(input.clone());

        Ok(state)
    }
}
