//! serde model of the Serverless Workflow v1.0.0 subset.
//!
//! The types mirror the YAML structure exactly so parsing stays a plain
//! serde derive. Task lists are sequences of single-key maps (the key is
//! the task name), which needs a small hand-written Deserialize; task
//! bodies are a tagged variant discriminated by which field is present.
//! Anything outside the supported set lands in [`TaskKind::Unknown`] and
//! is rejected by validation, not at parse time.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::duration::DurationSpec;

/// Default activity start-to-close timeout when the document declares none.
pub const DEFAULT_WORKFLOW_TIMEOUT: Duration = Duration::from_secs(60);

/// Metadata key holding per-task search attribute declarations.
pub const METADATA_SEARCH_ATTRIBUTES: &str = "searchAttributes";

/// A parsed declarative workflow. Immutable after load.
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub document: DocumentInfo,
    #[serde(default)]
    pub input: Option<InputSpec>,
    #[serde(default)]
    pub timeout: Option<TimeoutSpec>,
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
    pub r#do: TaskList,
}

impl Document {
    /// The workflow name bound to the task queue.
    pub fn workflow_name(&self) -> &str {
        &self.document.name
    }

    /// Task queues are derived from the document namespace.
    pub fn task_queue(&self) -> &str {
        &self.document.namespace
    }

    /// Activity start-to-close timeout: `timeout.after` or the default.
    pub fn timeout_duration(&self) -> Duration {
        self.timeout
            .as_ref()
            .and_then(|t| t.after.as_ref())
            .map(DurationSpec::to_duration)
            .unwrap_or(DEFAULT_WORKFLOW_TIMEOUT)
    }

    pub fn input_schema(&self) -> Option<&SchemaDef> {
        self.input.as_ref().and_then(|i| i.schema.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInfo {
    pub dsl: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputSpec {
    #[serde(default)]
    pub schema: Option<SchemaDef>,
}

/// A JSON schema declaration: `schema: { format: json, document: {…} }`.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaDef {
    #[serde(default)]
    pub format: Option<String>,
    pub document: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutSpec {
    #[serde(default)]
    pub after: Option<DurationSpec>,
}

/// `schedule.cron` and `schedule.every` translate to engine schedules;
/// `schedule.after` is declared by the DSL but unsupported here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleSpec {
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub every: Option<DurationSpec>,
    #[serde(default)]
    pub after: Option<DurationSpec>,
}

// ---------------------------------------------------------------------------
// Task list
// ---------------------------------------------------------------------------

/// Ordered list of named tasks. In YAML each entry is a single-key map:
///
/// ```yaml
/// do:
///   - fetchUser:
///       call: http
///       with: { method: get, endpoint: "https://example.com" }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TaskList(pub Vec<TaskItem>);

impl TaskList {
    pub fn iter(&self) -> std::slice::Iter<'_, TaskItem> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TaskItem {
    pub key: String,
    pub task: Task,
}

impl<'de> Deserialize<'de> for TaskList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<BTreeMap<String, Task>>::deserialize(deserializer)?;

        let mut items = Vec::with_capacity(raw.len());
        for (i, entry) in raw.into_iter().enumerate() {
            if entry.len() != 1 {
                return Err(serde::de::Error::custom(format!(
                    "task item {i} must contain exactly one task key"
                )));
            }
            let (key, task) = entry.into_iter().next().expect("length checked");
            items.push(TaskItem { key, task });
        }

        Ok(TaskList(items))
    }
}

/// A task body plus the common fields every kind carries.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    #[serde(flatten)]
    pub base: TaskBase,
    #[serde(flatten)]
    pub kind: TaskKind,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskBase {
    #[serde(default)]
    pub r#if: Option<String>,
    #[serde(default)]
    pub input: Option<InputSpec>,
    #[serde(default)]
    pub export: Option<Export>,
    #[serde(default)]
    pub then: Option<FlowDirective>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TaskBase {
    pub fn input_schema(&self) -> Option<&SchemaDef> {
        self.input.as_ref().and_then(|i| i.schema.as_ref())
    }

    pub fn search_attributes(&self) -> Option<&Value> {
        self.metadata.get(METADATA_SEARCH_ATTRIBUTES)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Export {
    pub r#as: String,
}

/// Per-task routing: continue in order, stop the sequence, or jump to a
/// named task further down the list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum FlowDirective {
    Continue,
    End,
    Exit,
    Target(String),
}

impl From<String> for FlowDirective {
    fn from(s: String) -> Self {
        match s.as_str() {
            "continue" => FlowDirective::Continue,
            "end" => FlowDirective::End,
            "exit" => FlowDirective::Exit,
            _ => FlowDirective::Target(s),
        }
    }
}

impl FlowDirective {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowDirective::End | FlowDirective::Exit)
    }
}

// ---------------------------------------------------------------------------
// Task kinds
// ---------------------------------------------------------------------------

/// The task body, discriminated by which field the YAML map carries.
/// Unsupported kinds (`emit`, `for`, `try`, …) parse into `Unknown` so the
/// validator can report them by name instead of failing the whole parse.
#[derive(Debug, Clone)]
pub enum TaskKind {
    Do(DoTask),
    Fork(ForkTask),
    Call(CallTask),
    Set(SetTask),
    Wait(WaitTask),
    Switch(SwitchTask),
    Run(RunTask),
    Listen(ListenTask),
    Raise(RaiseTask),
    Unknown(Map<String, Value>),
}

impl<'de> Deserialize<'de> for TaskKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = Map::<String, Value>::deserialize(deserializer)?;

        fn decode<'de, T, D>(map: &Map<String, Value>) -> Result<T, D::Error>
        where
            T: serde::de::DeserializeOwned,
            D: Deserializer<'de>,
        {
            serde_json::from_value(Value::Object(map.clone()))
                .map_err(serde::de::Error::custom)
        }

        // Unsupported kinds are checked first: a `for` task also carries a
        // `do` key and must not be classified as a plain sequence.
        if map.contains_key("emit") || map.contains_key("for") || map.contains_key("try") {
            return Ok(TaskKind::Unknown(map));
        }

        if map.contains_key("call") {
            return decode::<CallTask, D>(&map).map(TaskKind::Call);
        }
        if map.contains_key("do") {
            return decode::<DoTask, D>(&map).map(TaskKind::Do);
        }
        if map.contains_key("fork") {
            return decode::<ForkTask, D>(&map).map(TaskKind::Fork);
        }
        if map.contains_key("set") {
            return decode::<SetTask, D>(&map).map(TaskKind::Set);
        }
        if map.contains_key("wait") {
            return decode::<WaitTask, D>(&map).map(TaskKind::Wait);
        }
        if map.contains_key("switch") {
            return decode::<SwitchTask, D>(&map).map(TaskKind::Switch);
        }
        if map.contains_key("run") {
            return decode::<RunTask, D>(&map).map(TaskKind::Run);
        }
        if map.contains_key("listen") {
            return decode::<ListenTask, D>(&map).map(TaskKind::Listen);
        }
        if map.contains_key("raise") {
            return decode::<RaiseTask, D>(&map).map(TaskKind::Raise);
        }

        Ok(TaskKind::Unknown(map))
    }
}

impl TaskKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TaskKind::Do(_) => "do",
            TaskKind::Fork(_) => "fork",
            TaskKind::Call(_) => "call",
            TaskKind::Set(_) => "set",
            TaskKind::Wait(_) => "wait",
            TaskKind::Switch(_) => "switch",
            TaskKind::Run(_) => "run",
            TaskKind::Listen(_) => "listen",
            TaskKind::Raise(_) => "raise",
            TaskKind::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DoTask {
    pub r#do: TaskList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForkTask {
    pub fork: ForkSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForkSpec {
    pub branches: TaskList,
    /// `true` means first-to-finish wins and the rest are cancelled.
    #[serde(default)]
    pub compete: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallTask {
    /// The call protocol. Only `http` is supported; `grpc`/`openapi` are
    /// rejected by validation.
    pub call: String,
    pub with: HttpArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpArgs {
    pub method: String,
    pub endpoint: Endpoint,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub query: Map<String, Value>,
    /// Output shaping: `raw`, `response`, or (default) `content`.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub redirect: bool,
}

/// Endpoints appear as a bare URI string or as `{ uri: … }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Uri(String),
    Object { uri: String },
}

impl Endpoint {
    pub fn uri(&self) -> &str {
        match self {
            Endpoint::Uri(uri) => uri,
            Endpoint::Object { uri } => uri,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetTask {
    pub set: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitTask {
    pub wait: DurationSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchTask {
    pub switch: Vec<SwitchItem>,
}

/// A single-key map entry `- name: { when: …, then: … }`.
#[derive(Debug, Clone)]
pub struct SwitchItem {
    pub name: String,
    pub case: SwitchCase,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchCase {
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub then: Option<FlowDirective>,
}

impl<'de> Deserialize<'de> for SwitchItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entry = BTreeMap::<String, SwitchCase>::deserialize(deserializer)?;
        if entry.len() != 1 {
            return Err(serde::de::Error::custom(
                "switch item must contain exactly one named case",
            ));
        }
        let (name, case) = entry.into_iter().next().expect("length checked");
        Ok(SwitchItem { name, case })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunTask {
    pub run: RunSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunSpec {
    /// Only the `workflow` run variant is supported.
    #[serde(default)]
    pub workflow: Option<RunWorkflow>,
    /// Defaults to true. When false, the parent does not wait for the
    /// child and the child is abandoned on parent close.
    #[serde(default)]
    pub r#await: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunWorkflow {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenTask {
    pub listen: ListenSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListenSpec {
    #[serde(default)]
    pub to: EventStrategy,
}

/// Completion predicate over the declared events: `all`, `any`, or a
/// singleton `one` (treated as `all`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventStrategy {
    #[serde(default)]
    pub all: Vec<EventFilter>,
    #[serde(default)]
    pub any: Vec<EventFilter>,
    #[serde(default)]
    pub one: Option<EventFilter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventFilter {
    pub with: EventProps,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventProps {
    /// `query`, `signal` or `update`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// The signal channel / query name / update name.
    #[serde(default)]
    pub id: String,
    /// Free-form extras; a `data` subtree acts as the reply template.
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaiseTask {
    pub raise: RaiseSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaiseSpec {
    pub error: RaiseError,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RaiseError {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<Value>,
}
