//! In-process engine: the capability surface on plain tokio.
//!
//! Workflows run as spawned tasks; child workflows, cancellation, signals,
//! queries, updates and search attributes all work, but nothing is
//! persisted. Side effects execute directly (there is no replay to protect
//! against). The CLI dev runner and the test suite drive workflows through
//! this engine; production binds the same traits to a durable backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use super::schedule::LocalScheduleClient;
use super::{
    ActivityContext, ActivityInfo, ActivityOptions, ChildWorkflowHandle, ChildWorkflowOptions,
    ExecutionInfo, ParentClosePolicy, QueryHandler, Registry, SideEffectFn, SignalChannel,
    UpdateHandler, WorkflowContext, WorkflowCtx, WorkflowError,
};
use crate::attributes::{AttributeValue, SearchAttributeUpdate};
use crate::state::State;

type SharedResult = Shared<BoxFuture<'static, Result<Value, WorkflowError>>>;

/// Cooperative cancellation flag shared between a workflow and its handle.
struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// The in-process engine: a registry plus a schedule store.
pub struct LocalEngine {
    registry: Arc<Registry>,
    task_queue: String,
    schedules: Arc<LocalScheduleClient>,
}

impl LocalEngine {
    pub fn new(registry: Registry, task_queue: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(registry),
            task_queue: task_queue.into(),
            schedules: Arc::new(LocalScheduleClient::new()),
        }
    }

    pub fn schedule_client(&self) -> Arc<LocalScheduleClient> {
        Arc::clone(&self.schedules)
    }

    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    /// Dispatch a registered workflow. Returns a handle for interacting
    /// with the running execution.
    pub fn start_workflow(
        &self,
        name: &str,
        input: Value,
        workflow_id: Option<String>,
    ) -> Result<WorkflowHandle, WorkflowError> {
        let f = self
            .registry
            .workflow(name)
            .ok_or_else(|| WorkflowError::Engine(format!("unknown workflow: {name}")))?;

        let workflow_id = workflow_id.unwrap_or_else(|| format!("{name}_{}", Uuid::new_v4()));
        let ctx = Arc::new(LocalWorkflowContext::new(
            workflow_id.clone(),
            name.to_string(),
            self.task_queue.clone(),
            Arc::clone(&self.registry),
        ));

        debug!(workflow = name, id = %workflow_id, "Starting workflow");
        let wctx: WorkflowCtx = ctx.clone();
        let result = spawn_workflow(Arc::clone(&ctx), f(wctx, input, None));

        Ok(WorkflowHandle {
            workflow_id,
            ctx,
            result,
        })
    }
}

/// Run a workflow future with cancellation, then close out children per
/// their parent-close policies.
fn spawn_workflow(
    ctx: Arc<LocalWorkflowContext>,
    fut: BoxFuture<'static, Result<Value, WorkflowError>>,
) -> SharedResult {
    let cancel = Arc::clone(&ctx.cancel);

    let task = tokio::spawn(async move {
        let result = tokio::select! {
            res = fut => res,
            _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
        };
        ctx.close_children();
        result
    });

    async move {
        match task.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => Err(WorkflowError::Cancelled),
            Err(join_err) => Err(WorkflowError::Engine(format!("workflow panic: {join_err}"))),
        }
    }
    .boxed()
    .shared()
}

/// Client-side handle to a running local workflow.
pub struct WorkflowHandle {
    workflow_id: String,
    ctx: Arc<LocalWorkflowContext>,
    result: SharedResult,
}

impl std::fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("workflow_id", &self.workflow_id)
            .finish_non_exhaustive()
    }
}

impl WorkflowHandle {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub async fn result(&self) -> Result<Value, WorkflowError> {
        self.result.clone().await
    }

    pub fn cancel(&self) {
        self.ctx.cancel.cancel();
    }

    pub fn signal(&self, name: &str, payload: Value) {
        self.ctx.push_signal(name, payload);
    }

    pub fn query(&self, name: &str) -> Result<Value, WorkflowError> {
        let handler = self
            .ctx
            .queries
            .get(name)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| WorkflowError::Engine(format!("unknown query: {name}")))?;
        handler()
    }

    pub fn update(&self, name: &str, payload: Value) -> Result<Value, WorkflowError> {
        let handler = self
            .ctx
            .updates
            .get(name)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| WorkflowError::Engine(format!("unknown update: {name}")))?;
        handler(payload)
    }

    pub fn has_query_handler(&self, name: &str) -> bool {
        self.ctx.queries.contains_key(name)
    }

    pub fn has_update_handler(&self, name: &str) -> bool {
        self.ctx.updates.contains_key(name)
    }

    /// Snapshot of the execution's typed search attributes. `None` values
    /// are keys that were explicitly unset.
    pub fn search_attributes(
        &self,
    ) -> std::collections::HashMap<String, Option<AttributeValue>> {
        self.ctx.search_attributes.lock().clone()
    }
}

struct SignalSlot {
    tx: UnboundedSender<Value>,
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<Value>>>,
}

impl SignalSlot {
    fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

struct ChildRecord {
    policy: ParentClosePolicy,
    handle: Arc<LocalChildHandle>,
}

pub(crate) struct LocalWorkflowContext {
    info: ExecutionInfo,
    registry: Arc<Registry>,
    activity_options: parking_lot::RwLock<ActivityOptions>,
    signals: DashMap<String, SignalSlot>,
    queries: DashMap<String, QueryHandler>,
    updates: DashMap<String, UpdateHandler>,
    search_attributes: parking_lot::Mutex<std::collections::HashMap<String, Option<AttributeValue>>>,
    children: parking_lot::Mutex<Vec<ChildRecord>>,
    cancel: Arc<CancelFlag>,
}

impl LocalWorkflowContext {
    fn new(
        workflow_id: String,
        workflow_type: String,
        task_queue: String,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            info: ExecutionInfo {
                workflow_id,
                workflow_type,
                task_queue,
            },
            registry,
            activity_options: parking_lot::RwLock::new(ActivityOptions::default()),
            signals: DashMap::new(),
            queries: DashMap::new(),
            updates: DashMap::new(),
            search_attributes: parking_lot::Mutex::new(std::collections::HashMap::new()),
            children: parking_lot::Mutex::new(Vec::new()),
            cancel: CancelFlag::new(),
        }
    }

    fn push_signal(&self, name: &str, payload: Value) {
        let slot = self
            .signals
            .entry(name.to_string())
            .or_insert_with(SignalSlot::new);
        // Receiver side lives as long as the context; send cannot fail
        let _ = slot.tx.send(payload);
    }

    /// Cancel children whose parent-close policy is Terminate. Abandoned
    /// children keep running.
    fn close_children(&self) {
        let children = self.children.lock();
        for child in children.iter() {
            if child.policy == ParentClosePolicy::Terminate {
                child.handle.cancel();
            }
        }
    }
}

#[async_trait]
impl WorkflowContext for LocalWorkflowContext {
    fn info(&self) -> ExecutionInfo {
        self.info.clone()
    }

    fn activity_options(&self) -> ActivityOptions {
        self.activity_options.read().clone()
    }

    fn set_activity_options(&self, options: ActivityOptions) {
        *self.activity_options.write() = options;
    }

    async fn execute_activity(&self, name: &str, input: Value) -> Result<Value, WorkflowError> {
        let f = self
            .registry
            .activity(name)
            .ok_or_else(|| WorkflowError::Engine(format!("unknown activity: {name}")))?;

        let options = self.activity_options();
        let actx = Arc::new(LocalActivityContext {
            info: ActivityInfo {
                start_to_close: options.start_to_close,
                summary: options.summary.clone(),
            },
            cancel: Arc::clone(&self.cancel),
        });

        let fut = f(actx, input);
        tokio::select! {
            res = tokio::time::timeout(options.start_to_close, fut) => match res {
                Ok(result) => result,
                Err(_) => Err(WorkflowError::Timeout(format!(
                    "activity {name} exceeded start-to-close timeout"
                ))),
            },
            _ = self.cancel.cancelled() => Err(WorkflowError::Cancelled),
        }
    }

    async fn sleep(&self, duration: Duration) -> Result<(), WorkflowError> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(WorkflowError::Cancelled),
        }
    }

    async fn side_effect(&self, f: SideEffectFn) -> Result<Value, WorkflowError> {
        // No history to memoize into; execute directly. A durable backend
        // records the result so replays observe the same value.
        f()
    }

    fn start_child_workflow(
        &self,
        name: &str,
        input: Value,
        state: Option<State>,
        options: ChildWorkflowOptions,
    ) -> Result<Arc<dyn ChildWorkflowHandle>, WorkflowError> {
        let f = self
            .registry
            .workflow(name)
            .ok_or_else(|| WorkflowError::Engine(format!("unknown workflow: {name}")))?;

        let child_id = options
            .workflow_id
            .unwrap_or_else(|| format!("{}_{}", self.info.workflow_id, Uuid::new_v4()));

        let child_ctx = Arc::new(LocalWorkflowContext::new(
            child_id.clone(),
            name.to_string(),
            self.info.task_queue.clone(),
            Arc::clone(&self.registry),
        ));

        debug!(workflow = name, id = %child_id, "Starting child workflow");
        let cancel = Arc::clone(&child_ctx.cancel);
        let wctx: WorkflowCtx = child_ctx.clone();
        let result = spawn_workflow(Arc::clone(&child_ctx), f(wctx, input, state));

        let handle = Arc::new(LocalChildHandle {
            workflow_id: child_id,
            cancel,
            result,
        });

        self.children.lock().push(ChildRecord {
            policy: options.parent_close_policy,
            handle: Arc::clone(&handle),
        });

        Ok(handle)
    }

    fn signal_channel(&self, name: &str) -> Box<dyn SignalChannel> {
        let slot = self
            .signals
            .entry(name.to_string())
            .or_insert_with(SignalSlot::new);
        Box::new(LocalSignalChannel {
            rx: Arc::clone(&slot.rx),
        })
    }

    fn set_query_handler(&self, name: &str, handler: QueryHandler) -> Result<(), WorkflowError> {
        self.queries.insert(name.to_string(), handler);
        Ok(())
    }

    fn set_update_handler(&self, name: &str, handler: UpdateHandler) -> Result<(), WorkflowError> {
        self.updates.insert(name.to_string(), handler);
        Ok(())
    }

    fn upsert_search_attributes(
        &self,
        updates: Vec<SearchAttributeUpdate>,
    ) -> Result<(), WorkflowError> {
        let mut attrs = self.search_attributes.lock();
        for update in updates {
            attrs.insert(update.key, update.value);
        }
        Ok(())
    }
}

struct LocalChildHandle {
    workflow_id: String,
    cancel: Arc<CancelFlag>,
    result: SharedResult,
}

impl ChildWorkflowHandle for LocalChildHandle {
    fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn result(&self) -> BoxFuture<'static, Result<Value, WorkflowError>> {
        let shared = self.result.clone();
        async move { shared.await }.boxed()
    }
}

struct LocalSignalChannel {
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<Value>>>,
}

#[async_trait]
impl SignalChannel for LocalSignalChannel {
    async fn receive(&self) -> Option<Value> {
        self.rx.lock().await.recv().await
    }
}

struct LocalActivityContext {
    info: ActivityInfo,
    cancel: Arc<CancelFlag>,
}

#[async_trait]
impl ActivityContext for LocalActivityContext {
    fn info(&self) -> ActivityInfo {
        self.info.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
