//! The workflow registrar: compile the document into a [`Registry`] the
//! worker hands to the engine.
//!
//! The root `do` list is bound to `document.name`; every nested `do`,
//! fork branch and switch/run target registers under its computed name
//! during compilation. Activities discovered along the way land in the
//! same registry, so nothing is registered through process-global state.

use std::collections::HashMap;

use tracing::debug;

use crate::document::{Document, TaskBase};
use crate::engine::Registry;
use crate::error::Error;
use crate::http;
use crate::tasks::{CompileContext, DoTaskBuilder};

/// Compile the document and return the registry of named workflows and
/// activities. `env` is seeded into workflow state at execution start.
pub fn build_registry(doc: &Document, env: HashMap<String, String>) -> Result<Registry, Error> {
    let mut registry = Registry::new();

    // The one activity the DSL needs today
    registry.register_activity(http::CALL_HTTP_ACTIVITY, http::activity());

    let cctx = CompileContext::new(doc.timeout_duration(), env, doc.input_schema())?;

    let root = DoTaskBuilder::new(
        doc.workflow_name().to_string(),
        TaskBase::default(),
        doc.r#do.clone(),
        cctx,
    );

    let body = root.build_workflow(&mut registry)?;
    registry.register_workflow(doc.workflow_name().to_string(), body);

    debug!(
        workflows = ?registry.workflow_names(),
        activities = ?registry.activity_names(),
        "Registry built"
    );

    Ok(registry)
}

/// Collect environment variables carrying the given prefix. Keys keep
/// their full (prefixed) names.
pub fn load_envvars(prefix: &str) -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| key.starts_with(prefix))
        .collect()
}
