//! The `fork` task: parallel dispatch of sibling branches as child
//! workflows.
//!
//! `compete: false` waits for every branch and fails on the first branch
//! error. `compete: true` takes the first branch to finish as the winner
//! and cancels the rest; cancelled-branch errors are swallowed because
//! they are expected in that mode.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{
    child_workflow_name, BuildError, CompileContext, DoTaskBuilder, OutputKind, TaskBuilder,
    TaskFn, TaskOutput,
};
use crate::document::{ForkSpec, TaskBase, TaskItem, TaskKind, TaskList};
use crate::engine::{ChildWorkflowOptions, ParentClosePolicy, Registry, WorkflowError};

pub struct ForkTaskBuilder {
    name: String,
    base: TaskBase,
    fork: ForkSpec,
    cctx: CompileContext,
}

#[derive(Clone)]
struct CompiledBranch {
    key: String,
    workflow_name: String,
}

impl ForkTaskBuilder {
    pub fn new(name: String, base: TaskBase, fork: ForkSpec, cctx: CompileContext) -> Self {
        Self {
            name,
            base,
            fork,
            cctx,
        }
    }

    /// Register every branch as an independently invokable child workflow.
    /// Single-task branches are wrapped in a synthetic one-item `do`.
    fn compile_branches(&self, registry: &mut Registry) -> Result<Vec<CompiledBranch>, BuildError> {
        let mut branches = Vec::with_capacity(self.fork.branches.len());

        for item in self.fork.branches.iter() {
            let workflow_name = child_workflow_name("fork", &[&self.name, &item.key]);

            let list = match &item.task.kind {
                TaskKind::Do(do_task) => do_task.r#do.clone(),
                _ => {
                    debug!(task = %item.key, "Registering single task branch workflow");
                    TaskList(vec![TaskItem {
                        key: item.key.clone(),
                        task: item.task.clone(),
                    }])
                }
            };

            let builder = DoTaskBuilder::new(
                workflow_name.clone(),
                item.task.base.clone(),
                list,
                self.cctx.clone(),
            );
            let f = builder
                .build_workflow(registry)
                .map_err(|err| BuildError::Nested {
                    task: item.key.clone(),
                    source: Box::new(err),
                })?;
            registry.register_workflow(workflow_name.clone(), f);

            branches.push(CompiledBranch {
                key: item.key.clone(),
                workflow_name,
            });
        }

        Ok(branches)
    }
}

impl TaskBuilder for ForkTaskBuilder {
    fn task_name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn build(&self, registry: &mut Registry) -> Result<TaskFn, BuildError> {
        let branches = self.compile_branches(registry)?;
        let compete = self.fork.compete;

        Ok(Arc::new(move |ctx, input, state| {
            let branches = branches.clone();
            async move {
                debug!(is_competing = compete, "Forking a task");

                let parent_id = ctx.info().workflow_id;
                let mut handles = Vec::with_capacity(branches.len());

                for branch in &branches {
                    let options = ChildWorkflowOptions {
                        // Deterministic IDs keep forked executions addressable
                        workflow_id: Some(format!("{parent_id}_fork_{}", branch.key)),
                        // Competing branches are abandoned on parent close so
                        // cancellation does not cascade as a parent failure
                        parent_close_policy: if compete {
                            ParentClosePolicy::Abandon
                        } else {
                            ParentClosePolicy::Terminate
                        },
                    };

                    info!(name = %branch.workflow_name, "Triggering forked child workflow");
                    let handle = ctx.start_child_workflow(
                        &branch.workflow_name,
                        input.clone(),
                        Some(state.clone()),
                        options,
                    )?;
                    handles.push((branch.key.clone(), handle));
                }

                let mut pending = FuturesUnordered::new();
                for (idx, (_, handle)) in handles.iter().enumerate() {
                    let result = handle.result();
                    pending.push(async move { (idx, result.await) });
                }

                if compete {
                    // First successful branch wins; the rest are cancelled
                    let mut winner: Option<(usize, Value)> = None;
                    while let Some((idx, result)) = pending.next().await {
                        match result {
                            Ok(value) => {
                                winner = Some((idx, value));
                                break;
                            }
                            Err(err) if err.is_cancelled() => {
                                debug!(task = %handles[idx].0, "Forked task cancelled");
                            }
                            Err(err) => {
                                for (_, handle) in &handles {
                                    handle.cancel();
                                }
                                return Err(err);
                            }
                        }
                    }

                    let Some((winner_idx, value)) = winner else {
                        return Err(WorkflowError::Engine(
                            "no forked branch completed".to_string(),
                        ));
                    };

                    debug!(winner = %handles[winner_idx].0, "Winner declared");
                    debug!("Cancelling other forked workflows");
                    for (idx, (_, handle)) in handles.iter().enumerate() {
                        if idx != winner_idx {
                            handle.cancel();
                        }
                    }

                    Ok((state, TaskOutput::new(OutputKind::Fork, value)))
                } else {
                    // All branches must complete; the first error aborts the
                    // fork and the close policy deals with the siblings
                    let mut results = Map::new();
                    while let Some((idx, result)) = pending.next().await {
                        match result {
                            Ok(value) => {
                                results.insert(handles[idx].0.clone(), value);
                            }
                            Err(err) if err.is_cancelled() => {
                                debug!(task = %handles[idx].0, "Forked task cancelled");
                            }
                            Err(err) => return Err(err),
                        }
                    }

                    debug!("Forked task has completed");
                    Ok((state, TaskOutput::new(OutputKind::Fork, Value::Object(results))))
                }
            }
            .boxed()
        }))
    }
}
