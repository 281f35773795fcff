//! The `switch` task: evaluate cases in order and execute the first
//! matching target as a child workflow.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info};

use super::{check_if_statement, BuildError, OutputKind, TaskBuilder, TaskFn, TaskOutput};
use crate::document::{FlowDirective, SwitchItem, TaskBase};
use crate::engine::{ChildWorkflowOptions, Registry};

pub struct SwitchTaskBuilder {
    name: String,
    base: TaskBase,
    switch: Vec<SwitchItem>,
}

impl SwitchTaskBuilder {
    pub fn new(name: String, base: TaskBase, switch: Vec<SwitchItem>) -> Self {
        Self { name, base, switch }
    }
}

impl TaskBuilder for SwitchTaskBuilder {
    fn task_name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn build(&self, _registry: &mut Registry) -> Result<TaskFn, BuildError> {
        // At most one entry may omit `when` (the default branch)
        let mut has_default = false;
        for item in &self.switch {
            if item.case.when.is_none() {
                if has_default {
                    return Err(BuildError::MultipleDefaults(format!(
                        "{}.{}",
                        self.name, item.name
                    )));
                }
                has_default = true;
            }
        }

        let name = self.name.clone();
        let switch = self.switch.clone();

        Ok(Arc::new(move |ctx, input, state| {
            let name = name.clone();
            let switch = switch.clone();
            async move {
                for item in &switch {
                    debug!(task = %name, condition = %item.name, "Checking if we should run this switch statement");

                    if !check_if_statement(item.case.when.as_deref(), &state)? {
                        debug!(task = %name, condition = %item.name, "Skipping switch statement task");
                        continue;
                    }

                    let target = match &item.case.then {
                        Some(FlowDirective::Target(target)) => target.clone(),
                        _ => {
                            debug!("Skipping task as then is termination or not set");
                            return Ok((state, TaskOutput::new(OutputKind::Switch, Value::Null)));
                        }
                    };

                    info!(task = %name, condition = %item.name, "Executing switch statement's task as a child workflow");
                    let handle = ctx.start_child_workflow(
                        &target,
                        input.clone(),
                        Some(state.clone()),
                        ChildWorkflowOptions::default(),
                    )?;
                    let result = handle.result().await.map_err(|err| {
                        debug!(task = %name, condition = %item.name, "Error executing child switch workflow");
                        err
                    })?;

                    // First match wins; nothing else is evaluated
                    return Ok((state, TaskOutput::new(OutputKind::Switch, result)));
                }

                Ok((state, TaskOutput::new(OutputKind::Switch, Value::Null)))
            }
            .boxed()
        }))
    }
}
