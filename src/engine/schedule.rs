//! Schedule client capability surface and its in-process implementation.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ScheduleError {
    #[error("error listing schedules: {0}")]
    List(String),

    #[error("error creating schedule: {0}")]
    Create(String),

    #[error("error deleting schedule: {0}")]
    Delete(String),

    #[error("schedule workflow name must be set in document metadata")]
    MissingWorkflowName,

    #[error("{0}")]
    InvalidSpec(String),
}

/// Engine-side schedule specification: cron expressions and/or fixed
/// intervals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleSpec {
    pub cron_expressions: Vec<String>,
    pub intervals: Vec<Duration>,
}

/// What the schedule runs when it fires.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleWorkflowAction {
    pub workflow: String,
    pub task_queue: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOptions {
    pub id: String,
    pub spec: ScheduleSpec,
    pub action: ScheduleWorkflowAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub id: String,
}

#[async_trait]
pub trait ScheduleClient: Send + Sync {
    async fn list(&self) -> Result<Vec<ScheduleEntry>, ScheduleError>;
    async fn create(&self, options: ScheduleOptions) -> Result<(), ScheduleError>;
    async fn delete(&self, id: &str) -> Result<(), ScheduleError>;
}

/// In-memory schedule store for the local engine and tests.
#[derive(Default)]
pub struct LocalScheduleClient {
    store: DashMap<String, ScheduleOptions>,
}

impl LocalScheduleClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ScheduleOptions> {
        self.store.get(id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl ScheduleClient for LocalScheduleClient {
    async fn list(&self) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let mut entries: Vec<_> = self
            .store
            .iter()
            .map(|e| ScheduleEntry { id: e.key().clone() })
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn create(&self, options: ScheduleOptions) -> Result<(), ScheduleError> {
        if self.store.contains_key(&options.id) {
            return Err(ScheduleError::Create(format!(
                "schedule already exists: {}",
                options.id
            )));
        }
        self.store.insert(options.id.clone(), options);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ScheduleError> {
        self.store
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ScheduleError::Delete(format!("unknown schedule: {id}")))
    }
}
