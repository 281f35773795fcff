//! The `listen` task: register query/signal/update handlers and block
//! until the declared completion predicate is satisfied.
//!
//! - `query` registers a read-only handler; a listen containing a query is
//!   non-blocking and returns right after registration.
//! - `signal` blocks on the named channel; each receipt lands in
//!   `state.data[<taskKey>]`.
//! - `update` registers a handler; each receipt lands in
//!   `state.data[<eventId>]` and the declared reply template is evaluated
//!   against live state.
//!
//! Completion is `all` (every entry), `any` (at least one) or `one`
//! (single entry, treated as `all`). `metadata.timeout` bounds the wait.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FusedStream, FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::{BuildError, OutputKind, TaskBuilder, TaskFn, TaskOutput};
use crate::document::{EventFilter, ListenSpec, TaskBase};
use crate::duration::parse_duration_str;
use crate::engine::{QueryHandler, Registry, UpdateHandler, WorkflowCtx, WorkflowError};
use crate::expr;
use crate::state::State;

const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenKind {
    Query,
    Signal,
    Update,
}

impl ListenKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "query" => Some(Self::Query),
            "signal" => Some(Self::Signal),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct CompiledEvent {
    id: String,
    kind: ListenKind,
    /// The `data` subtree of the event's additional properties, kept
    /// uninterpolated; it is deep-cloned and evaluated per invocation.
    reply: Option<Value>,
}

pub struct ListenTaskBuilder {
    name: String,
    base: TaskBase,
    listen: ListenSpec,
}

impl ListenTaskBuilder {
    pub fn new(name: String, base: TaskBase, listen: ListenSpec) -> Self {
        Self { name, base, listen }
    }

    /// Resolve the consumption strategy into a flat event list plus the
    /// all/any flag. A `one` is treated as an `all` of one.
    fn list_events(&self) -> Result<(Vec<CompiledEvent>, bool), BuildError> {
        let to = &self.listen.to;

        let (filters, is_all): (Vec<&EventFilter>, bool) = if !to.all.is_empty() {
            (to.all.iter().collect(), true)
        } else if !to.any.is_empty() {
            (to.any.iter().collect(), false)
        } else if let Some(one) = &to.one {
            (vec![one], true)
        } else {
            return Err(BuildError::NoEvents(self.name.clone()));
        };

        let mut events = Vec::with_capacity(filters.len());
        for filter in filters {
            events.push(self.compile_event(filter)?);
        }
        Ok((events, is_all))
    }

    fn compile_event(&self, filter: &EventFilter) -> Result<CompiledEvent, BuildError> {
        if filter.with.id.is_empty() {
            return Err(BuildError::InvalidEventFilter {
                task: self.name.clone(),
                detail: "listen task id is not set".to_string(),
            });
        }
        if filter.with.kind.is_empty() {
            return Err(BuildError::InvalidEventFilter {
                task: self.name.clone(),
                detail: "listen task type is not set".to_string(),
            });
        }
        let Some(kind) = ListenKind::parse(&filter.with.kind) else {
            return Err(BuildError::InvalidEventFilter {
                task: self.name.clone(),
                detail: format!("listen task type is not known: {}", filter.with.kind),
            });
        };

        Ok(CompiledEvent {
            id: filter.with.id.clone(),
            kind,
            reply: filter.with.additional.get("data").cloned(),
        })
    }

    fn timeout(&self) -> Result<Duration, BuildError> {
        let Some(declared) = self.base.metadata.get("timeout") else {
            return Ok(DEFAULT_LISTEN_TIMEOUT);
        };
        let Value::String(s) = declared else {
            return Err(BuildError::InvalidTimeout {
                task: self.name.clone(),
                detail: "timeout must be a string".to_string(),
            });
        };
        parse_duration_str(s).map_err(|detail| BuildError::InvalidTimeout {
            task: self.name.clone(),
            detail,
        })
    }
}

impl TaskBuilder for ListenTaskBuilder {
    fn task_name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn build(&self, _registry: &mut Registry) -> Result<TaskFn, BuildError> {
        let (events, is_all) = self.list_events()?;
        let timeout = self.timeout()?;
        let name = self.name.clone();

        Ok(Arc::new(move |ctx, _input, state| {
            let events = events.clone();
            let name = name.clone();
            async move {
                run_listen(ctx, name, events, is_all, timeout, state).await
            }
            .boxed()
        }))
    }
}

async fn run_listen(
    ctx: WorkflowCtx,
    name: String,
    events: Vec<CompiledEvent>,
    is_all: bool,
    timeout: Duration,
    state: State,
) -> Result<(State, TaskOutput), WorkflowError> {
    debug!(task = %name, "Registering listeners");

    // Handlers observe and mutate state for the task's lifetime
    let shared = Arc::new(parking_lot::Mutex::new(state));
    let complete = Arc::new(parking_lot::Mutex::new(vec![false; events.len()]));
    let notify = Arc::new(Notify::new());

    let mut has_query = false;
    let mut signals: FuturesUnordered<BoxFuture<'static, (usize, Option<Value>)>> =
        FuturesUnordered::new();

    for (idx, event) in events.iter().enumerate() {
        match event.kind {
            ListenKind::Query => {
                // Non-blocking: the handler just answers with the template
                has_query = true;
                let handler: QueryHandler = {
                    let shared = Arc::clone(&shared);
                    let event = event.clone();
                    Arc::new(move || {
                        debug!(event = %event.id, "New query received");
                        process_reply(&event, &shared.lock())
                    })
                };
                ctx.set_query_handler(&event.id, handler)?;
            }
            ListenKind::Signal => {
                debug!(signal = %event.id, "Creating signal");
                let channel = ctx.signal_channel(&event.id);
                signals.push(
                    async move {
                        let payload = channel.receive().await;
                        (idx, payload)
                    }
                    .boxed(),
                );
            }
            ListenKind::Update => {
                let handler: UpdateHandler = {
                    let shared = Arc::clone(&shared);
                    let complete = Arc::clone(&complete);
                    let notify = Arc::clone(&notify);
                    let event = event.clone();
                    Arc::new(move |payload: Value| {
                        debug!(event = %event.id, "New update received");
                        let mut state = shared.lock();
                        state.add_data_entry(&event.id, payload);
                        let reply = process_reply(&event, &state);
                        drop(state);

                        complete.lock()[idx] = true;
                        notify.notify_waiters();
                        reply
                    })
                };
                ctx.set_update_handler(&event.id, handler)?;
            }
        }
    }

    // A query entry makes the whole listen non-blocking
    if !has_query {
        await_completion(&ctx, &name, is_all, timeout, &mut signals, &shared, &complete, &notify)
            .await?;
    }

    let state = shared.lock().clone();
    Ok((state, TaskOutput::new(OutputKind::Listen, Value::Null)))
}

#[allow(clippy::too_many_arguments)]
async fn await_completion(
    ctx: &WorkflowCtx,
    name: &str,
    is_all: bool,
    timeout: Duration,
    signals: &mut FuturesUnordered<BoxFuture<'static, (usize, Option<Value>)>>,
    shared: &Arc<parking_lot::Mutex<State>>,
    complete: &Arc<parking_lot::Mutex<Vec<bool>>>,
    notify: &Arc<Notify>,
) -> Result<(), WorkflowError> {
    debug!(task = %name, "Wait for listener");

    let timer = ctx.sleep(timeout);
    tokio::pin!(timer);

    loop {
        let done = {
            let flags = complete.lock();
            if is_all {
                flags.iter().all(|&f| f)
            } else {
                flags.iter().any(|&f| f)
            }
        };
        if done {
            return Ok(());
        }

        tokio::select! {
            received = signals.next(), if !signals.is_terminated() => {
                if let Some((idx, payload)) = received {
                    if let Some(payload) = payload {
                        // Signal payloads land under the task key
                        shared.lock().add_data_entry(name, payload);
                    }
                    complete.lock()[idx] = true;
                }
            }
            _ = notify.notified() => {}
            res = &mut timer => {
                res?;
                warn!(task = %name, "Await timeout");
                return Err(WorkflowError::Timeout(format!(
                    "listen task timed out: {name}"
                )));
            }
        }
    }
}

/// Evaluate the event's reply template against the current state. The
/// stored template is never mutated, so each reply re-interpolates live
/// data from scratch.
fn process_reply(event: &CompiledEvent, state: &State) -> Result<Value, WorkflowError> {
    let Some(template) = &event.reply else {
        return Ok(Value::Null);
    };

    let evaluated =
        expr::traverse_and_evaluate(template, &state.as_map()).map_err(WorkflowError::from)?;
    debug!(event = %event.id, "Replied from event");
    Ok(evaluated)
}
