//! The HTTP activity: the one side-effectful task body.
//!
//! Runs outside the deterministic context. Interpolates method, endpoint,
//! headers, query and body against the carried state, performs one
//! request/response transaction, and shapes the output per `with.output`.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::document::HttpArgs;
use crate::engine::{ActivityCtx, ActivityFn, WorkflowError};
use crate::expr;
use crate::state::State;

/// Activity name the workflow side schedules against.
pub const CALL_HTTP_ACTIVITY: &str = "call_http";

/// Serialized activity argument: the declared call plus the state snapshot
/// its expressions evaluate against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpActivityInput {
    pub task: HttpArgs,
    pub state: State,
}

/// The `response` output shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub request: HttpRequest,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// The registrable activity function.
pub fn activity() -> ActivityFn {
    Arc::new(|ctx, input| call_http_activity(ctx, input).boxed())
}

async fn call_http_activity(ctx: ActivityCtx, input: Value) -> Result<Value, WorkflowError> {
    debug!("Running call HTTP activity");

    let input: HttpActivityInput =
        serde_json::from_value(input).map_err(|err| WorkflowError::Engine(err.to_string()))?;
    let doc = input.state.as_map();
    let task = &input.task;

    let method = evaluate_to_string(&task.method, &doc, "method")?.to_uppercase();
    let url = evaluate_to_string(task.endpoint.uri(), &doc, "endpoint")?;

    let mut req_headers = BTreeMap::new();
    for (key, value) in &task.headers {
        req_headers.insert(key.clone(), evaluate_to_string(value, &doc, "header")?);
    }

    let mut query = Vec::with_capacity(task.query.len());
    for (key, value) in &task.query {
        // Query values must interpolate to strings; anything else is a
        // type error, not a silent coercion
        let evaluated = match value {
            Value::String(s) => expr::evaluate_str(s, &doc).map_err(WorkflowError::from)?,
            other => other.clone(),
        };
        let Value::String(s) = evaluated else {
            return Err(WorkflowError::non_retryable(
                format!("query value for '{key}' must be a string"),
                "CallHTTP error",
            ));
        };
        query.push((key.clone(), s));
    }

    let body = match &task.body {
        None => None,
        Some(declared) => {
            let evaluated =
                expr::traverse_and_evaluate(declared, &doc).map_err(WorkflowError::from)?;
            Some(match evaluated {
                Value::String(s) => s,
                other => serde_json::to_string(&other)
                    .map_err(|err| WorkflowError::Engine(err.to_string()))?,
            })
        }
    };

    let timeout = ctx.info().start_to_close;
    let redirect_policy = if task.redirect {
        reqwest::redirect::Policy::limited(10)
    } else {
        // Return the last response instead of following
        reqwest::redirect::Policy::none()
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(redirect_policy)
        .build()
        .map_err(|err| WorkflowError::Engine(format!("error building HTTP client: {err}")))?;

    let reqwest_method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|_| {
        WorkflowError::non_retryable(format!("invalid HTTP method: {method}"), "CallHTTP error")
    })?;

    debug!(method = %method, url = %url, "Making HTTP call");
    let mut request = client.request(reqwest_method, url.as_str()).query(&query);
    for (key, value) in &req_headers {
        request = request.header(key, value);
    }
    if let Some(body) = body {
        request = request.body(body);
    }

    let send = request.send();
    let response = tokio::select! {
        response = send => response.map_err(|err| {
            error!(method = %method, url = %url, error = %err, "Error making HTTP call");
            WorkflowError::retryable(format!("error making HTTP call: {err}"), "CallHTTP error")
        })?,
        _ = ctx.cancelled() => return Err(WorkflowError::Cancelled),
    };

    let status = response.status();
    let final_url = response.url().to_string();

    let mut resp_headers = BTreeMap::new();
    for (key, value) in response.headers() {
        resp_headers.insert(
            key.to_string(),
            value.to_str().unwrap_or_default().to_string(),
        );
    }

    let raw = response
        .bytes()
        .await
        .map_err(|err| WorkflowError::retryable(format!("error reading HTTP body: {err}"), "CallHTTP error"))?;

    // Try converting the body as JSON, keeping it as a string if not possible
    let content = match serde_json::from_slice::<Value>(&raw) {
        Ok(parsed) => parsed,
        Err(_) => Value::String(String::from_utf8_lossy(&raw).to_string()),
    };

    // Redirect statuses only survive here when following is disabled (or
    // the redirect was malformed); both are errors
    if status.is_redirection() {
        error!(status = status.as_u16(), "CallHTTP returned 3xx status");
        return Err(WorkflowError::non_retryable(
            "CallHTTP returned 3xx status code",
            "CallHTTP error",
        )
        .with_details(content));
    }

    if status.is_client_error() {
        // Client error - the request needs fixing, retrying cannot help
        error!(status = status.as_u16(), "CallHTTP returned 4xx error");
        return Err(WorkflowError::non_retryable(
            "CallHTTP returned 4xx status code",
            "CallHTTP error",
        )
        .with_details(content));
    }

    if status.is_server_error() {
        error!(status = status.as_u16(), "CallHTTP returned 5xx error");
        return Err(WorkflowError::retryable(
            "CallHTTP returned 5xx status code",
            "CallHTTP error",
        )
        .with_details(content));
    }

    let http_response = HttpResponse {
        request: HttpRequest {
            method,
            uri: final_url,
            headers: req_headers,
        },
        status_code: status.as_u16(),
        headers: resp_headers,
        content,
    };

    Ok(parse_output(task.output.as_deref(), http_response, &raw))
}

/// Shape the activity result per `with.output`.
fn parse_output(output: Option<&str>, response: HttpResponse, raw: &[u8]) -> Value {
    match output {
        // Base64 encoded raw HTTP response bytes
        Some("raw") => Value::String(base64::engine::general_purpose::STANDARD.encode(raw)),
        Some("response") => serde_json::to_value(&response).unwrap_or(Value::Null),
        _ => response.content,
    }
}

fn evaluate_to_string(raw: &str, doc: &Value, what: &str) -> Result<String, WorkflowError> {
    match expr::evaluate_str(raw, doc).map_err(WorkflowError::from)? {
        Value::String(s) => Ok(s),
        other => Err(WorkflowError::non_retryable(
            format!("{what} must evaluate to a string, got: {other}"),
            "CallHTTP error",
        )),
    }
}
