//! Top-level error types for the Windlass CLI and library.
//!
//! Each layer keeps its own error enum (`ExpressionError`, `BuildError`,
//! `WorkflowError`, `ScheduleError`); this module provides the wrapper the
//! loader and binary work with, plus the aggregated validation record.

use thiserror::Error;

/// Top-level error for loading and compiling a workflow document.
#[derive(Error, Debug)]
pub enum Error {
    /// Only DSL v1.0.0 is implemented. Later versions may be supported.
    #[error("unsupported dsl version: {0}")]
    UnsupportedDsl(String),

    /// The document uses a task kind outside the supported set.
    #[error("unsupported task: {0}")]
    UnsupportedTask(String),

    #[error("error loading file: {0}")]
    Io(#[from] std::io::Error),

    #[error("error loading yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Expression(#[from] crate::expr::ExpressionError),

    #[error(transparent)]
    Build(#[from] crate::tasks::BuildError),

    #[error(transparent)]
    Schedule(#[from] crate::schedules::ScheduleError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

/// A single accumulated validation failure. An empty list means the
/// document passed validation; these are reported together rather than
/// failing on the first problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending declaration, e.g.
    /// `order.metadata.searchAttributes.CustomerId`.
    pub key: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}
