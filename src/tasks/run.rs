//! The `run` task: invoke another registered workflow by name.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{evaluate_obj_deterministic, BuildError, OutputKind, TaskBuilder, TaskFn, TaskOutput};
use crate::document::{RunSpec, TaskBase};
use crate::engine::{ChildWorkflowOptions, ParentClosePolicy, Registry};

pub struct RunTaskBuilder {
    name: String,
    base: TaskBase,
    run: RunSpec,
}

impl RunTaskBuilder {
    pub fn new(name: String, base: TaskBase, run: RunSpec) -> Self {
        Self { name, base, run }
    }
}

impl TaskBuilder for RunTaskBuilder {
    fn task_name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn build(&self, _registry: &mut Registry) -> Result<TaskFn, BuildError> {
        // Validation has already rejected non-workflow run kinds
        let Some(workflow) = self.run.workflow.clone() else {
            return Err(BuildError::UnsupportedTask {
                task: self.name.clone(),
                kind: "run".to_string(),
            });
        };

        let name = self.name.clone();
        // Await defaults to true
        let await_child = self.run.r#await.unwrap_or(true);

        Ok(Arc::new(move |ctx, input, state| {
            let name = name.clone();
            let workflow = workflow.clone();
            async move {
                debug!(task = %name, await_child, "Running a child workflow");

                // Declared input overrides the parent's payload
                let child_input = match &workflow.input {
                    Some(declared) => evaluate_obj_deterministic(&ctx, declared, &state).await?,
                    None => input,
                };

                let options = ChildWorkflowOptions {
                    workflow_id: None,
                    parent_close_policy: if await_child {
                        ParentClosePolicy::Terminate
                    } else {
                        ParentClosePolicy::Abandon
                    },
                };

                let handle = ctx.start_child_workflow(
                    &workflow.name,
                    child_input,
                    Some(state.clone()),
                    options,
                )?;

                if !await_child {
                    warn!(task = %name, "Not waiting for child workflow response");
                    return Ok((state, TaskOutput::new(OutputKind::Run, Value::Null)));
                }

                let result = handle.result().await.map_err(|err| {
                    error!(task = %name, error = %err, "Error executing child workflow");
                    err
                })?;
                debug!(task = %name, "Child workflow completed");

                Ok((state, TaskOutput::new(OutputKind::Run, result)))
            }
            .boxed()
        }))
    }
}
