//! Schedule reconciliation: converge the engine's schedules on what the
//! document declares.
//!
//! The flow is list-delete-create and is not atomic; exactly one
//! reconciler should own a document's schedule ID.

use tracing::{debug, info};

use crate::document::Document;
use crate::duration::DurationSpec;
use crate::engine::schedule::{
    ScheduleClient, ScheduleOptions, ScheduleSpec, ScheduleWorkflowAction,
};

pub use crate::engine::schedule::ScheduleError;

const SCHEDULE_METADATA_ID: &str = "scheduleId";
const SCHEDULE_METADATA_WORKFLOW: &str = "scheduleWorkflowName";
const SCHEDULE_METADATA_INPUT: &str = "scheduleInput";

/// Reconcile the document's schedule section. Existing schedules matching
/// the computed identifier are always deleted first, so applying the same
/// document twice converges on a single schedule.
pub async fn upsert_schedule(
    client: &dyn ScheduleClient,
    doc: &Document,
    task_queue: &str,
) -> Result<(), ScheduleError> {
    // Base the schedule ID on the workflow name, unless overridden
    let schedule_id = match doc.document.metadata.get(SCHEDULE_METADATA_ID) {
        Some(serde_json::Value::String(id)) => id.clone(),
        Some(_) => {
            return Err(ScheduleError::InvalidSpec(
                "schedule id must be a string".to_string(),
            ))
        }
        None => format!("dsl_{}", doc.workflow_name()),
    };

    // Always delete matching schedules
    for entry in client.list().await? {
        if entry.id == schedule_id {
            debug!(id = %entry.id, "Deleting existing schedule");
            client.delete(&entry.id).await?;
        }
    }

    // If no schedule set, nothing to do now
    let Some(schedule) = &doc.schedule else {
        return Ok(());
    };

    let workflow = match doc.document.metadata.get(SCHEDULE_METADATA_WORKFLOW) {
        Some(serde_json::Value::String(name)) => name.clone(),
        Some(_) => {
            return Err(ScheduleError::InvalidSpec(
                "schedule workflow name must be a string".to_string(),
            ))
        }
        None => return Err(ScheduleError::MissingWorkflowName),
    };

    let spec = build_schedule_spec(schedule)?;

    let args = match doc.document.metadata.get(SCHEDULE_METADATA_INPUT) {
        Some(serde_json::Value::Array(items)) => items.clone(),
        Some(_) => {
            return Err(ScheduleError::InvalidSpec(
                "schedule input must be in array format".to_string(),
            ))
        }
        None => Vec::new(),
    };

    info!(id = %schedule_id, workflow = %workflow, "Creating schedule");
    client
        .create(ScheduleOptions {
            id: schedule_id,
            spec,
            action: ScheduleWorkflowAction {
                workflow,
                task_queue: task_queue.to_string(),
                args,
            },
        })
        .await
}

/// Translate the declared schedule into the engine form.
fn build_schedule_spec(
    schedule: &crate::document::ScheduleSpec,
) -> Result<ScheduleSpec, ScheduleError> {
    if schedule.after.is_some() {
        return Err(ScheduleError::InvalidSpec(
            "schedule.after not supported".to_string(),
        ));
    }

    let mut spec = ScheduleSpec::default();
    if let Some(cron) = &schedule.cron {
        spec.cron_expressions.push(cron.clone());
    }
    if let Some(every) = &schedule.every {
        spec.intervals.push(DurationSpec::to_duration(every));
    }

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::schedule::LocalScheduleClient;
    use crate::loader::load_from_str;

    fn scheduled_doc(extra_metadata: &str) -> Document {
        load_from_str(&format!(
            r#"
document:
  dsl: 1.0.0
  namespace: test
  name: nightly
  version: 0.0.1
  metadata:
    scheduleWorkflowName: nightly
{extra_metadata}
schedule:
  cron: "0 2 * * *"
do:
  - noop:
      wait:
        seconds: 0
"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn creates_schedule_with_default_id() {
        let client = LocalScheduleClient::new();
        let doc = scheduled_doc("");

        upsert_schedule(&client, &doc, "test").await.unwrap();

        let created = client.get("dsl_nightly").expect("schedule exists");
        assert_eq!(created.action.workflow, "nightly");
        assert_eq!(created.action.task_queue, "test");
        assert_eq!(created.spec.cron_expressions, vec!["0 2 * * *"]);
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent() {
        let client = LocalScheduleClient::new();
        let doc = scheduled_doc("");

        upsert_schedule(&client, &doc, "test").await.unwrap();
        upsert_schedule(&client, &doc, "test").await.unwrap();

        assert_eq!(client.len(), 1);
    }

    #[tokio::test]
    async fn metadata_schedule_id_overrides_default() {
        let client = LocalScheduleClient::new();
        let doc = scheduled_doc("    scheduleId: custom_schedule");

        upsert_schedule(&client, &doc, "test").await.unwrap();
        assert!(client.get("custom_schedule").is_some());
        assert!(client.get("dsl_nightly").is_none());
    }

    #[tokio::test]
    async fn document_without_schedule_deletes_stale_entry() {
        let client = LocalScheduleClient::new();
        let doc = scheduled_doc("");
        upsert_schedule(&client, &doc, "test").await.unwrap();

        let unscheduled = load_from_str(
            r#"
document:
  dsl: 1.0.0
  namespace: test
  name: nightly
  version: 0.0.1
do:
  - noop:
      wait:
        seconds: 0
"#,
        )
        .unwrap();
        upsert_schedule(&client, &unscheduled, "test").await.unwrap();

        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn missing_workflow_name_is_an_error() {
        let client = LocalScheduleClient::new();
        let mut doc = scheduled_doc("");
        doc.document.metadata.remove("scheduleWorkflowName");

        let err = upsert_schedule(&client, &doc, "test").await.unwrap_err();
        assert!(matches!(err, ScheduleError::MissingWorkflowName));
    }

    #[tokio::test]
    async fn schedule_after_is_rejected() {
        let client = LocalScheduleClient::new();
        let doc = load_from_str(
            r#"
document:
  dsl: 1.0.0
  namespace: test
  name: delayed
  version: 0.0.1
  metadata:
    scheduleWorkflowName: delayed
schedule:
  after:
    minutes: 10
do:
  - noop:
      wait:
        seconds: 0
"#,
        )
        .unwrap();

        let err = upsert_schedule(&client, &doc, "test").await.unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidSpec(msg) if msg.contains("after")));
    }

    #[tokio::test]
    async fn interval_schedules_translate_to_intervals() {
        let client = LocalScheduleClient::new();
        let doc = load_from_str(
            r#"
document:
  dsl: 1.0.0
  namespace: test
  name: ticker
  version: 0.0.1
  metadata:
    scheduleWorkflowName: ticker
    scheduleInput:
      - seed: 1
schedule:
  every:
    minutes: 5
do:
  - noop:
      wait:
        seconds: 0
"#,
        )
        .unwrap();

        upsert_schedule(&client, &doc, "test").await.unwrap();
        let created = client.get("dsl_ticker").unwrap();
        assert_eq!(
            created.spec.intervals,
            vec![std::time::Duration::from_secs(300)]
        );
        assert_eq!(created.action.args.len(), 1);
    }
}
