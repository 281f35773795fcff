//! End-to-end executor tests: compiled documents driven on the in-process
//! engine.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use windlass::engine::local::{LocalEngine, WorkflowHandle};
use windlass::engine::WorkflowError;

fn start(
    yaml: &str,
    env: &[(&str, &str)],
    input: Value,
) -> (LocalEngine, WorkflowHandle) {
    let doc = windlass::load_from_str(yaml).expect("document should load");
    let errors = windlass::validate(&doc).expect("validation should run");
    assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");

    let env_map: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let registry = windlass::build_registry(&doc, env_map).expect("registry should build");
    let engine = LocalEngine::new(registry, doc.task_queue().to_string());
    let handle = engine
        .start_workflow(doc.workflow_name(), input, None)
        .expect("workflow should start");
    (engine, handle)
}

async fn run(yaml: &str, env: &[(&str, &str)], input: Value) -> Result<Value, WorkflowError> {
    let (_engine, handle) = start(yaml, env, input);
    handle.result().await
}

#[tokio::test]
async fn basic_sequence_with_env_and_uuid() {
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: basic
  version: 0.0.1
do:
  - init:
      export:
        as: "${ seeded }"
      set:
        envvar: "${ .env.EXAMPLE }"
        id: "${ uuid }"
  - pause:
      wait:
        seconds: 0
"#,
        &[("EXAMPLE", "hi")],
        json!({}),
    )
    .await
    .unwrap();

    assert_eq!(output["seeded"]["envvar"], "hi");
    let id = output["seeded"]["id"].as_str().expect("uuid is a string");
    assert_eq!(id.len(), 36);
}

#[tokio::test]
async fn no_exports_returns_empty_output() {
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: quiet
  version: 0.0.1
do:
  - init:
      set:
        a: 1
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap();

    assert_eq!(output, json!({}));
}

#[tokio::test]
async fn if_gates_skip_false_branches() {
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: gated
  version: 0.0.1
do:
  - first:
      set:
        a: 1
  - second:
      if: "${ .data.a == 1 }"
      export:
        as: "${ ran }"
      set:
        b: 2
  - third:
      if: "${ .data.a == 2 }"
      export:
        as: "${ never }"
      set:
        c: 3
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap();

    assert_eq!(output["ran"]["b"], 2);
    assert!(output.get("never").is_none());
}

#[tokio::test]
async fn then_jump_skips_intermediate_tasks() {
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: jumpy
  version: 0.0.1
do:
  - one:
      then: three
      export:
        as: "${ one }"
      set:
        marker: one
  - two:
      export:
        as: "${ two }"
      set:
        marker: two
  - three:
      export:
        as: "${ three }"
      set:
        marker: three
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap();

    assert_eq!(output["one"]["marker"], "one");
    assert_eq!(output["three"]["marker"], "three");
    assert!(output.get("two").is_none());
}

#[tokio::test]
async fn then_end_stops_the_sequence() {
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: ender
  version: 0.0.1
do:
  - one:
      then: end
      export:
        as: "${ one }"
      set:
        marker: one
  - two:
      export:
        as: "${ two }"
      set:
        marker: two
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap();

    assert!(output.get("one").is_some());
    assert!(output.get("two").is_none());
}

#[tokio::test]
async fn unknown_then_target_fails_after_the_loop() {
    let err = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: lost
  version: 0.0.1
do:
  - one:
      then: nowhere
      set:
        marker: one
  - two:
      set:
        marker: two
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap_err();

    let WorkflowError::Application(app) = err else {
        panic!("expected application error, got {err:?}");
    };
    assert!(app.non_retryable);
    assert!(app.message.contains("nowhere"));
}

#[tokio::test]
async fn task_data_flows_through_expressions() {
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: flowing
  version: 0.0.1
do:
  - seed:
      set:
        n: 2
  - double:
      export:
        as: "${ doubled }"
      set:
        n: "${ .data.n * 2 }"
  - current:
      export:
        as: "${ taskName }"
      set:
        name: "${ .data.task.name }"
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap();

    assert_eq!(output["doubled"]["n"], 4);
    // .data.task.name reflects the executing task key
    assert_eq!(output["taskName"]["name"], "current");
}

#[tokio::test]
async fn document_input_schema_rejects_bad_payloads() {
    let yaml = r#"
document:
  dsl: 1.0.0
  namespace: test
  name: strict
  version: 0.0.1
input:
  schema:
    format: json
    document:
      type: object
      required:
        - orderType
do:
  - noop:
      wait:
        seconds: 0
"#;

    let err = run(yaml, &[], json!({})).await.unwrap_err();
    let WorkflowError::Application(app) = err else {
        panic!("expected application error");
    };
    assert!(app.non_retryable);
    assert_eq!(app.code, "Validation");
    assert_eq!(
        app.message,
        "Workflow input did not meet JSON schema specification"
    );

    let ok = run(yaml, &[], json!({"orderType": "electronic"})).await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn competing_fork_resolves_with_the_fast_branch() {
    let started = Instant::now();
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: race
  version: 0.0.1
do:
  - parallel:
      export:
        as: "${ winner }"
      fork:
        compete: true
        branches:
          - fast:
              export:
                as: "${ speed }"
              set:
                speed: fast
          - slow:
              do:
                - linger:
                    wait:
                      seconds: 5
                - tag:
                    export:
                      as: "${ speed }"
                    set:
                      speed: slow
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap();

    // The slow branch sleeps for seconds; winning must not wait for it
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(output["winner"]["speed"]["speed"], "fast");
}

#[tokio::test]
async fn non_competing_fork_collects_all_branches() {
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: gather
  version: 0.0.1
do:
  - parallel:
      export:
        as: "${ branches }"
      fork:
        compete: false
        branches:
          - alpha:
              export:
                as: "${ value }"
              set:
                value: a
          - beta:
              export:
                as: "${ value }"
              set:
                value: b
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap();

    assert_eq!(output["branches"]["alpha"]["value"]["value"], "a");
    assert_eq!(output["branches"]["beta"]["value"]["value"], "b");
}

#[tokio::test]
async fn non_competing_fork_propagates_branch_errors() {
    let err = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: doomed
  version: 0.0.1
do:
  - parallel:
      fork:
        compete: false
        branches:
          - ok:
              wait:
                seconds: 0
          - bad:
              raise:
                error:
                  type: https://example.com/errors/demo
                  status: 500
                  title: Branch failed
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap_err();

    let WorkflowError::Application(app) = err else {
        panic!("expected application error");
    };
    assert_eq!(app.message, "Branch failed");
}

#[tokio::test]
async fn fork_branch_state_does_not_bleed_into_parent() {
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: isolated
  version: 0.0.1
do:
  - parallel:
      fork:
        compete: false
        branches:
          - writer:
              set:
                branchOnly: true
  - probe:
      export:
        as: "${ seen }"
      set:
        value: "${ .data.branchOnly }"
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap();

    // The branch mutated its own clone, not the parent state
    assert_eq!(output["seen"]["value"], Value::Null);
}

#[tokio::test]
async fn switch_selects_first_matching_case() {
    let yaml = r#"
document:
  dsl: 1.0.0
  namespace: test
  name: orders
  version: 0.0.1
do:
  - processElectronic:
      do:
        - charge:
            export:
              as: "${ processed }"
            set:
              method: electronic
  - processPhysical:
      do:
        - ship:
            export:
              as: "${ processed }"
            set:
              method: physical
  - raiseUnknown:
      do:
        - fail:
            raise:
              error:
                type: https://example.com/errors/unknown-order
                status: 400
                title: Unknown order type
  - route:
      export:
        as: "${ routed }"
      switch:
        - electronic:
            when: "${ .input.orderType == \"electronic\" }"
            then: processElectronic
        - physical:
            when: "${ .input.orderType == \"physical\" }"
            then: processPhysical
        - unknown:
            then: raiseUnknown
"#;

    let output = run(yaml, &[], json!({"orderType": "electronic"}))
        .await
        .unwrap();
    assert_eq!(output["routed"]["processed"]["method"], "electronic");

    let output = run(yaml, &[], json!({"orderType": "physical"}))
        .await
        .unwrap();
    assert_eq!(output["routed"]["processed"]["method"], "physical");

    // The default branch raises
    let err = run(yaml, &[], json!({"orderType": "carrier-pigeon"}))
        .await
        .unwrap_err();
    let WorkflowError::Application(app) = err else {
        panic!("expected application error");
    };
    assert_eq!(app.message, "Unknown order type");
}

#[tokio::test]
async fn switch_terminal_then_returns_without_child() {
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: short-circuit
  version: 0.0.1
do:
  - route:
      switch:
        - bail:
            when: "${ .input.stop == true }"
            then: end
  - after:
      export:
        as: "${ after }"
      set:
        ran: true
"#,
        &[],
        json!({"stop": true}),
    )
    .await
    .unwrap();

    // The switch returned without executing a child; the sequence continues
    assert_eq!(output["after"]["ran"], true);
}

#[tokio::test]
async fn run_task_invokes_registered_workflow() {
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: runner
  version: 0.0.1
do:
  - child:
      do:
        - work:
            export:
              as: "${ result }"
            set:
              done: true
  - invoke:
      export:
        as: "${ childOutput }"
      run:
        workflow:
          name: child
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap();

    assert_eq!(output["childOutput"]["result"]["done"], true);
}

#[tokio::test]
async fn run_without_await_returns_immediately() {
    let started = Instant::now();
    let output = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: detached
  version: 0.0.1
do:
  - child:
      do:
        - linger:
            wait:
              seconds: 5
  - invoke:
      export:
        as: "${ detached }"
      run:
        workflow:
          name: child
        await: false
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(output["detached"], Value::Null);
}

#[tokio::test]
async fn raise_terminates_with_declared_error() {
    let err = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: raiser
  version: 0.0.1
do:
  - fail:
      raise:
        error:
          type: https://example.com/errors/demo
          status: 503
          title: Deliberate failure
          detail: raised by the demo workflow
"#,
        &[],
        json!({}),
    )
    .await
    .unwrap_err();

    let WorkflowError::Application(app) = err else {
        panic!("expected application error");
    };
    assert!(app.non_retryable);
    assert_eq!(app.message, "Deliberate failure");
    assert_eq!(app.code, "https://example.com/errors/demo");
    assert_eq!(app.details.as_ref().unwrap()["status"], 503);
}

#[tokio::test]
async fn listen_signal_stores_payload_and_completes() {
    let (_engine, handle) = start(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: approvals
  version: 0.0.1
do:
  - waitForApproval:
      metadata:
        timeout: 5s
      listen:
        to:
          one:
            with:
              type: signal
              id: approval
  - record:
      export:
        as: "${ received }"
      set:
        payload: "${ .data.waitForApproval }"
"#,
        &[],
        json!({}),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.signal("approval", json!({"approved": true}));

    let output = handle.result().await.unwrap();
    assert_eq!(output["received"]["payload"]["approved"], true);
}

#[tokio::test]
async fn listen_any_completes_on_first_signal() {
    let (_engine, handle) = start(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: either
  version: 0.0.1
do:
  - waitForEither:
      metadata:
        timeout: 5s
      listen:
        to:
          any:
            - with:
                type: signal
                id: approve
            - with:
                type: signal
                id: reject
"#,
        &[],
        json!({}),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.signal("reject", json!("declined"));

    assert!(handle.result().await.is_ok());
}

#[tokio::test]
async fn listen_times_out_without_events() {
    let (_engine, handle) = start(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: lonely
  version: 0.0.1
do:
  - waitForever:
      metadata:
        timeout: 100ms
      listen:
        to:
          one:
            with:
              type: signal
              id: ghost
"#,
        &[],
        json!({}),
    );

    let err = handle.result().await.unwrap_err();
    assert!(matches!(err, WorkflowError::Timeout(_)));
}

#[tokio::test]
async fn listen_update_replies_with_live_template() {
    let (_engine, handle) = start(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: reviewer
  version: 0.0.1
do:
  - seed:
      set:
        status: pending
  - waitForReview:
      metadata:
        timeout: 5s
      listen:
        to:
          one:
            with:
              type: update
              id: review
              data:
                status: "${ .data.status }"
                received: "${ .data.review }"
"#,
        &[],
        json!({}),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reply = handle.update("review", json!({"score": 9})).unwrap();

    assert_eq!(reply["status"], "pending");
    assert_eq!(reply["received"]["score"], 9);
    assert!(handle.result().await.is_ok());
}

#[tokio::test]
async fn listen_query_is_non_blocking() {
    let started = Instant::now();
    let (_engine, handle) = start(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: queryable
  version: 0.0.1
do:
  - seed:
      set:
        count: 3
  - expose:
      listen:
        to:
          one:
            with:
              type: query
              id: progress
              data:
                count: "${ .data.count }"
"#,
        &[],
        json!({}),
    );

    // Query entries never block the sequence
    handle.result().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    let answer = handle.query("progress").unwrap();
    assert_eq!(answer["count"], 3);
}

#[tokio::test]
async fn search_attributes_coerce_and_apply() {
    use windlass::attributes::AttributeValue;

    let (_engine, handle) = start(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: tagged
  version: 0.0.1
do:
  - work:
      metadata:
        searchAttributes:
          Count:
            type: Int
            value: "239"
          StartedAt:
            type: DateTime
            value: "2025-04-21T09:18:00Z"
          Active:
            type: Bool
            value: "TRUE"
          Labels:
            type: KeywordList
            value:
              - alpha
              - beta
      set:
        a: 1
"#,
        &[],
        json!({}),
    );

    handle.result().await.unwrap();

    let attrs = handle.search_attributes();
    assert_eq!(attrs["Count"], Some(AttributeValue::Int(239)));
    assert_eq!(attrs["Active"], Some(AttributeValue::Bool(true)));
    assert_eq!(
        attrs["Labels"],
        Some(AttributeValue::KeywordList(vec![
            "alpha".to_string(),
            "beta".to_string()
        ]))
    );
    let Some(AttributeValue::DateTime(t)) = &attrs["StartedAt"] else {
        panic!("expected datetime attribute");
    };
    assert_eq!(t.to_rfc3339(), "2025-04-21T09:18:00+00:00");
}

#[tokio::test]
async fn per_task_input_schema_is_enforced() {
    let err = run(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: picky
  version: 0.0.1
do:
  - needy:
      input:
        schema:
          format: json
          document:
            type: object
            required:
              - mustExist
      set:
        a: 1
"#,
        &[],
        json!({"other": true}),
    )
    .await
    .unwrap_err();

    let WorkflowError::Application(app) = err else {
        panic!("expected application error");
    };
    assert_eq!(app.code, "Validation");
}
