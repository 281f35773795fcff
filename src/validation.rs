//! Document validation.
//!
//! Schema-shape validation is the parser's job. This pass checks that
//! nothing is used that we've not implemented (which should reduce over
//! time) and that declared search attributes have a recognised type and a
//! compatible value. Unsupported task kinds fail fast; search-attribute
//! problems are accumulated so callers can present all of them at once.

use crate::attributes::decode_search_attributes;
use crate::document::{Document, TaskItem, TaskKind, TaskList, METADATA_SEARCH_ATTRIBUTES};
use crate::error::{Error, ValidationError};

/// Validate the document. Returns the accumulated declarative validation
/// errors; an empty list means success. Structural problems (unsupported
/// task kinds) return an error instead of being accumulated.
pub fn validate(doc: &Document) -> Result<Vec<ValidationError>, Error> {
    let mut errors = Vec::new();
    validate_task_list(&doc.r#do, "", &mut errors)?;
    Ok(errors)
}

fn validate_task_list(
    tasks: &TaskList,
    prefix: &str,
    errors: &mut Vec<ValidationError>,
) -> Result<(), Error> {
    for item in tasks.iter() {
        validate_task_supported(item)?;

        let path = if prefix.is_empty() {
            item.key.clone()
        } else {
            format!("{prefix}.{}", item.key)
        };

        validate_search_attributes(item, &path, errors);

        match &item.task.kind {
            TaskKind::Do(do_task) => validate_task_list(&do_task.r#do, &path, errors)?,
            TaskKind::Fork(fork) => validate_task_list(&fork.fork.branches, &path, errors)?,
            _ => {}
        }
    }

    Ok(())
}

fn validate_task_supported(item: &TaskItem) -> Result<(), Error> {
    match &item.task.kind {
        TaskKind::Call(call) if call.call != "http" => {
            Err(Error::UnsupportedTask(format!("call {}", call.call)))
        }
        // Only workflow runs are implemented
        TaskKind::Run(run) if run.run.workflow.is_none() => {
            Err(Error::UnsupportedTask("run".to_string()))
        }
        TaskKind::Unknown(map) => Err(Error::UnsupportedTask(unknown_kind_name(map))),
        _ => Ok(()),
    }
}

/// Name the offending kind for the error message. Declared-but-unsupported
/// DSL kinds are listed first so `emit`/`for`/`try` read cleanly.
fn unknown_kind_name(map: &serde_json::Map<String, serde_json::Value>) -> String {
    for known in ["emit", "for", "try"] {
        if map.contains_key(known) {
            return known.to_string();
        }
    }
    map.keys().cloned().collect::<Vec<_>>().join(",")
}

fn validate_search_attributes(item: &TaskItem, path: &str, errors: &mut Vec<ValidationError>) {
    let Some(declared) = item.task.base.search_attributes() else {
        return;
    };

    let attrs = match decode_search_attributes(declared) {
        Ok(attrs) => attrs,
        Err(err) => {
            errors.push(ValidationError {
                key: format!("{path}.metadata.{METADATA_SEARCH_ATTRIBUTES}"),
                message: err.to_string(),
            });
            return;
        }
    };

    for (name, attr) in attrs {
        if let Err(err) = attr.to_update(&name) {
            errors.push(ValidationError {
                key: format!("{path}.metadata.{METADATA_SEARCH_ATTRIBUTES}.{name}"),
                message: err.to_string(),
            });
        }
    }
}
