//! The `wait` task: durable sleep for the declared duration.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use super::{BuildError, OutputKind, TaskBuilder, TaskFn, TaskOutput};
use crate::document::TaskBase;
use crate::duration::DurationSpec;
use crate::engine::Registry;

pub struct WaitTaskBuilder {
    name: String,
    base: TaskBase,
    wait: DurationSpec,
}

impl WaitTaskBuilder {
    pub fn new(name: String, base: TaskBase, wait: DurationSpec) -> Self {
        Self { name, base, wait }
    }
}

impl TaskBuilder for WaitTaskBuilder {
    fn task_name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn build(&self, _registry: &mut Registry) -> Result<TaskFn, BuildError> {
        let duration = self.wait.to_duration();

        Ok(Arc::new(move |ctx, _input, state| {
            async move {
                // Zero duration is legal: complete without scheduling a timer
                if !duration.is_zero() {
                    debug!(duration = ?duration, "Sleeping");
                    ctx.sleep(duration).await?;
                }

                Ok((state, TaskOutput::new(OutputKind::Wait, Value::Null)))
            }
            .boxed()
        }))
    }
}
