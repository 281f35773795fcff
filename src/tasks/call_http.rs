//! The `call: http` task: the workflow side of the HTTP activity.
//!
//! The workflow body only enqueues the activity and merges its result into
//! state; the actual request runs in [`crate::http`] outside the
//! deterministic context.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error};

use super::{BuildError, OutputKind, TaskBuilder, TaskFn, TaskOutput};
use crate::document::{HttpArgs, TaskBase};
use crate::engine::{Registry, WorkflowError};
use crate::http::{HttpActivityInput, CALL_HTTP_ACTIVITY};

pub struct CallHttpTaskBuilder {
    name: String,
    base: TaskBase,
    args: HttpArgs,
}

impl CallHttpTaskBuilder {
    pub fn new(name: String, base: TaskBase, args: HttpArgs) -> Self {
        Self { name, base, args }
    }
}

impl TaskBuilder for CallHttpTaskBuilder {
    fn task_name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn build(&self, _registry: &mut Registry) -> Result<TaskFn, BuildError> {
        let name = self.name.clone();
        let args = self.args.clone();

        Ok(Arc::new(move |ctx, _input, mut state| {
            let name = name.clone();
            let args = args.clone();
            async move {
                debug!(name = %name, "Calling HTTP endpoint");

                let activity_input = serde_json::to_value(HttpActivityInput {
                    task: args,
                    state: state.clone(),
                })
                .map_err(|err| WorkflowError::Engine(err.to_string()))?;

                let result = match ctx.execute_activity(CALL_HTTP_ACTIVITY, activity_input).await {
                    Ok(result) => result,
                    // A cancelled HTTP call is a graceful no-op
                    Err(err) if err.is_cancelled() => {
                        return Ok((
                            state,
                            TaskOutput::new(OutputKind::CallHttp, serde_json::Value::Null),
                        ))
                    }
                    Err(err) => {
                        error!(name = %name, error = %err, "Error calling HTTP task");
                        return Err(err);
                    }
                };

                debug!(key = %name, "Setting data to the state");
                state.add_data_entry(&name, result.clone());

                Ok((state, TaskOutput::new(OutputKind::CallHttp, result)))
            }
            .boxed()
        }))
    }
}
