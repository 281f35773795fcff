//! The `set` task: evaluate the declared block against state and merge the
//! result into `data`.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::debug;

use super::{evaluate_obj_deterministic, BuildError, OutputKind, TaskBuilder, TaskFn, TaskOutput};
use crate::document::TaskBase;
use crate::engine::{Registry, WorkflowError};

pub struct SetTaskBuilder {
    name: String,
    base: TaskBase,
    set: Map<String, Value>,
}

impl SetTaskBuilder {
    pub fn new(name: String, base: TaskBase, set: Map<String, Value>) -> Self {
        Self { name, base, set }
    }
}

impl TaskBuilder for SetTaskBuilder {
    fn task_name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn build(&self, _registry: &mut Registry) -> Result<TaskFn, BuildError> {
        let set = self.set.clone();

        Ok(Arc::new(move |ctx, _input, mut state| {
            let set = set.clone();
            async move {
                // Expressions may call uuid, so evaluation runs under the
                // side-effect primitive to stay replay-deterministic.
                let result = evaluate_obj_deterministic(&ctx, &Value::Object(set), &state)
                    .await
                    .map_err(|err| match err {
                        WorkflowError::Application(mut app) => {
                            app.message = format!("error parsing set data: {}", app.message);
                            WorkflowError::Application(app)
                        }
                        other => other,
                    })?;

                let Value::Object(map) = result else {
                    return Err(WorkflowError::retryable(
                        "unknown data type",
                        "Set error",
                    ));
                };

                debug!(keys = map.len(), "Adding set data to state");
                state.add_data(map.clone());

                Ok((state, TaskOutput::new(OutputKind::Set, Value::Object(map))))
            }
            .boxed()
        }))
    }
}
