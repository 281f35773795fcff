//! The `raise` task: terminate the workflow with a declared error.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;
use tracing::warn;

use super::{BuildError, TaskBuilder, TaskFn};
use crate::document::{RaiseSpec, TaskBase};
use crate::engine::{Registry, WorkflowError};

pub struct RaiseTaskBuilder {
    name: String,
    base: TaskBase,
    raise: RaiseSpec,
}

impl RaiseTaskBuilder {
    pub fn new(name: String, base: TaskBase, raise: RaiseSpec) -> Self {
        Self { name, base, raise }
    }
}

impl TaskBuilder for RaiseTaskBuilder {
    fn task_name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn build(&self, _registry: &mut Registry) -> Result<TaskFn, BuildError> {
        let error = self.raise.error.clone();
        let name = self.name.clone();

        Ok(Arc::new(move |_ctx, _input, _state| {
            let error = error.clone();
            let name = name.clone();
            async move {
                let message = error
                    .title
                    .clone()
                    .unwrap_or_else(|| format!("error raised by task: {name}"));
                let code = error
                    .kind
                    .clone()
                    .unwrap_or_else(|| "Raised error".to_string());

                warn!(task = %name, code = %code, "Raising workflow error");
                Err(WorkflowError::non_retryable(message, code).with_details(json!({
                    "status": error.status,
                    "detail": error.detail,
                })))
            }
            .boxed()
        }))
    }
}
