//! HTTP call tests against a wiremock server.

use std::collections::HashMap;

use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use windlass::engine::local::LocalEngine;
use windlass::engine::WorkflowError;

async fn run_http(yaml: &str, base: &str, input: Value) -> Result<Value, WorkflowError> {
    let doc = windlass::load_from_str(yaml).expect("document should load");
    assert!(windlass::validate(&doc).unwrap().is_empty());

    let env: HashMap<String, String> = [("BASE".to_string(), base.to_string())].into();
    let registry = windlass::build_registry(&doc, env).unwrap();
    let engine = LocalEngine::new(registry, doc.task_queue().to_string());
    engine
        .start_workflow(doc.workflow_name(), input, None)
        .unwrap()
        .result()
        .await
}

fn get_doc(extra_with: &str) -> String {
    format!(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: fetcher
  version: 0.0.1
do:
  - fetch:
      export:
        as: "${{ fetched }}"
      call: http
      with:
        method: get
        endpoint: "${{ .env.BASE + \"/1\" }}"
{extra_with}
"#
    )
}

#[tokio::test]
async fn get_request_parses_json_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "first"})))
        .expect(1)
        .mount(&server)
        .await;

    let output = run_http(&get_doc(""), &server.uri(), json!({})).await.unwrap();
    assert_eq!(output["fetched"]["id"], 1);
    assert_eq!(output["fetched"]["name"], "first");
}

#[tokio::test]
async fn non_json_bodies_stay_strings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("plain text body"))
        .mount(&server)
        .await;

    let output = run_http(&get_doc(""), &server.uri(), json!({})).await.unwrap();
    assert_eq!(output["fetched"], "plain text body");
}

#[tokio::test]
async fn headers_and_query_are_interpolated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1"))
        .and(header("x-api-key", "sekrit"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: fetcher
  version: 0.0.1
do:
  - init:
      set:
        apiKey: sekrit
        page: "2"
  - fetch:
      export:
        as: "${{ fetched }}"
      call: http
      with:
        method: get
        endpoint: "${{ .env.BASE + \"/1\" }}"
        headers:
          x-api-key: "${{ .data.apiKey }}"
        query:
          page: "${{ .data.page }}"
"#
    );

    let output = run_http(&yaml, &server.uri(), json!({})).await.unwrap();
    assert_eq!(output["fetched"]["ok"], true);
}

#[tokio::test]
async fn post_body_is_interpolated_and_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(body_json(json!({"orderType": "electronic", "count": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accepted": true})))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = r#"
document:
  dsl: 1.0.0
  namespace: test
  name: poster
  version: 0.0.1
do:
  - submit:
      export:
        as: "${ submitted }"
      call: http
      with:
        method: post
        endpoint: "${ .env.BASE + \"/orders\" }"
        headers:
          content-type: application/json
        body:
          orderType: "${ .input.orderType }"
          count: 1
"#;

    let output = run_http(yaml, &server.uri(), json!({"orderType": "electronic"}))
        .await
        .unwrap();
    assert_eq!(output["submitted"]["accepted"], true);
}

#[tokio::test]
async fn client_errors_are_non_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "missing"})))
        .mount(&server)
        .await;

    let err = run_http(&get_doc(""), &server.uri(), json!({})).await.unwrap_err();
    let WorkflowError::Application(app) = err else {
        panic!("expected application error");
    };
    assert!(app.non_retryable);
    assert_eq!(app.message, "CallHTTP returned 4xx status code");
    assert_eq!(app.details.as_ref().unwrap()["error"], "missing");
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = run_http(&get_doc(""), &server.uri(), json!({})).await.unwrap_err();
    let WorkflowError::Application(app) = err else {
        panic!("expected application error");
    };
    assert!(!app.non_retryable);
    assert_eq!(app.message, "CallHTTP returned 5xx status code");
}

#[tokio::test]
async fn redirect_refused_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("{}/final", server.uri())),
        )
        .mount(&server)
        .await;

    let err = run_http(&get_doc(""), &server.uri(), json!({})).await.unwrap_err();
    let WorkflowError::Application(app) = err else {
        panic!("expected application error");
    };
    assert!(app.non_retryable);
    assert_eq!(app.message, "CallHTTP returned 3xx status code");
}

#[tokio::test]
async fn redirect_followed_when_enabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("{}/final", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/final"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"landed": true})))
        .mount(&server)
        .await;

    let output = run_http(
        &get_doc("        redirect: true"),
        &server.uri(),
        json!({}),
    )
    .await
    .unwrap();
    assert_eq!(output["fetched"]["landed"], true);
}

#[tokio::test]
async fn raw_output_is_base64_of_body_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello world"))
        .mount(&server)
        .await;

    let output = run_http(
        &get_doc("        output: raw"),
        &server.uri(),
        json!({}),
    )
    .await
    .unwrap();
    assert_eq!(output["fetched"], "aGVsbG8gd29ybGQ=");
}

#[tokio::test]
async fn response_output_carries_request_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(&server)
        .await;

    let output = run_http(
        &get_doc("        output: response"),
        &server.uri(),
        json!({}),
    )
    .await
    .unwrap();

    let fetched = &output["fetched"];
    assert_eq!(fetched["statusCode"], 200);
    assert_eq!(fetched["request"]["method"], "GET");
    assert!(fetched["request"]["uri"].as_str().unwrap().ends_with("/1"));
    assert_eq!(fetched["content"]["id"], 1);
}

#[tokio::test]
async fn result_is_merged_into_state_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
document:
  dsl: 1.0.0
  namespace: test
  name: chained
  version: 0.0.1
do:
  - fetch:
      call: http
      with:
        method: get
        endpoint: "${{ .env.BASE + \"/1\" }}"
  - useIt:
      export:
        as: "${{ derived }}"
      set:
        fetchedId: "${{ .data.fetch.id }}"
"#
    );

    let output = run_http(&yaml, &server.uri(), json!({})).await.unwrap();
    assert_eq!(output["derived"]["fetchedId"], 7);
}
