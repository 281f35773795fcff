//! Runtime expression evaluation.
//!
//! An input string is either a plain scalar or a "strict expression" of the
//! exact form `${ … }`. Scalars pass through untouched; expressions are
//! parsed as a jq-style query and executed against the state projection
//! ([`crate::state::State::as_map`]) as the input document.
//!
//! Supports:
//! - paths: `.data.a.b`, `.input.items[0].name`, `$env.KEY`
//! - literals: numbers, strings, `true`, `false`, `null`
//! - comparison: `==`, `!=`, `<`, `<=`, `>`, `>=`
//! - arithmetic: `+`, `-`, `*`, `/`, `%` (plus string/array concat via `+`)
//! - boolean: `and`, `or`
//! - zero-or-more-arg functions: `uuid`
//!
//! Does NOT support:
//! - pipes, filters, slices, wildcards
//! - variable bindings beyond the four state slots
//! - string interpolation inside literals
//!
//! The evaluator itself is pure. Non-deterministic builtins (`uuid`) are
//! made replay-safe by running the whole evaluation under the engine's
//! side-effect primitive; workflow bodies do that via the wrapper in
//! `crate::tasks`, while activity bodies and build-time gates evaluate
//! inline.

mod eval;
mod parser;

use serde_json::Value;
use thiserror::Error;

pub use parser::Query;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("failed to parse expression: {expr}, error: {detail}")]
    Parse { expr: String, detail: String },

    #[error("expression evaluation error: {0}")]
    Eval(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

/// Whether the string is a strict runtime expression, i.e. the exact form
/// `${ … }`.
pub fn is_strict_expr(s: &str) -> bool {
    s.starts_with("${") && s.ends_with('}')
}

/// Strip the `${ … }` wrapper. Returns the input unchanged when it is not
/// a strict expression.
pub fn sanitize(s: &str) -> &str {
    if is_strict_expr(s) {
        s[2..s.len() - 1].trim()
    } else {
        s
    }
}

/// Evaluate a string against the state projection. Non-expressions are
/// returned unchanged (as a string value); expressions are parsed and run,
/// producing the first value.
pub fn evaluate_str(s: &str, doc: &Value) -> Result<Value, ExpressionError> {
    if !is_strict_expr(s) {
        return Ok(Value::String(s.to_string()));
    }

    Query::parse(sanitize(s))?.run(doc)
}

/// Recursively walk maps, arrays and strings, replacing every embedded
/// strict expression with its evaluated value.
pub fn traverse_and_evaluate(node: &Value, doc: &Value) -> Result<Value, ExpressionError> {
    match node {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), traverse_and_evaluate(value, doc)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for value in items {
                out.push(traverse_and_evaluate(value, doc)?);
            }
            Ok(Value::Array(out))
        }
        Value::String(s) => evaluate_str(s, doc),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "data": {"a": 1, "task": {"name": "current"}},
            "env": {"EXAMPLE": "hi"},
            "input": {"orderType": "electronic", "items": ["first", "second"]},
            "output": {},
        })
    }

    #[test]
    fn non_expressions_pass_through() {
        assert_eq!(
            evaluate_str("plain text", &doc()).unwrap(),
            json!("plain text")
        );
        // Missing the closing brace: not a strict expression
        assert_eq!(
            evaluate_str("${ .data.a", &doc()).unwrap(),
            json!("${ .data.a")
        );
    }

    #[test]
    fn strict_expr_detection() {
        assert!(is_strict_expr("${ .data.a }"));
        assert!(is_strict_expr("${uuid}"));
        assert!(!is_strict_expr("data.a"));
        assert!(!is_strict_expr("$ {.data.a}"));
    }

    #[test]
    fn sanitize_strips_wrapper() {
        assert_eq!(sanitize("${ .data.a }"), ".data.a");
        assert_eq!(sanitize("not an expression"), "not an expression");
    }

    #[test]
    fn evaluates_paths() {
        assert_eq!(evaluate_str("${ .data.a }", &doc()).unwrap(), json!(1));
        assert_eq!(
            evaluate_str("${ .env.EXAMPLE }", &doc()).unwrap(),
            json!("hi")
        );
        assert_eq!(
            evaluate_str("${ .input.items[1] }", &doc()).unwrap(),
            json!("second")
        );
        assert_eq!(
            evaluate_str("${ .data.task.name }", &doc()).unwrap(),
            json!("current")
        );
    }

    #[test]
    fn missing_paths_are_null() {
        assert_eq!(
            evaluate_str("${ .data.missing }", &doc()).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn evaluates_comparisons() {
        assert_eq!(evaluate_str("${ .data.a == 1 }", &doc()).unwrap(), json!(true));
        assert_eq!(
            evaluate_str("${ .data.a == 2 }", &doc()).unwrap(),
            json!(false)
        );
        assert_eq!(
            evaluate_str("${ .input.orderType == \"electronic\" }", &doc()).unwrap(),
            json!(true)
        );
        assert_eq!(evaluate_str("${ .data.a < 5 }", &doc()).unwrap(), json!(true));
    }

    #[test]
    fn evaluates_boolean_operators() {
        assert_eq!(
            evaluate_str("${ .data.a == 1 and .env.EXAMPLE == \"hi\" }", &doc()).unwrap(),
            json!(true)
        );
        assert_eq!(
            evaluate_str("${ .data.a == 2 or .data.a == 1 }", &doc()).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn uuid_builtin_produces_identifier() {
        let value = evaluate_str("${ uuid }", &doc()).unwrap();
        let s = value.as_str().expect("uuid is a string");
        assert_eq!(s.len(), 36);

        // Two evaluations produce distinct identifiers
        let other = evaluate_str("${ uuid }", &doc()).unwrap();
        assert_ne!(value, other);
    }

    #[test]
    fn unknown_function_errors() {
        let err = evaluate_str("${ nonsense }", &doc()).unwrap_err();
        assert!(matches!(err, ExpressionError::UnknownFunction(f) if f == "nonsense"));
    }

    #[test]
    fn parse_failure_reports_expression() {
        let err = evaluate_str("${ .data.a == }", &doc()).unwrap_err();
        assert!(matches!(err, ExpressionError::Parse { .. }));
    }

    #[test]
    fn traverse_replaces_nested_expressions() {
        let tree = json!({
            "envvar": "${ .env.EXAMPLE }",
            "static": "untouched",
            "nested": {"deep": "${ .data.a }"},
            "list": ["${ .data.a }", 2],
            "number": 42,
        });

        let out = traverse_and_evaluate(&tree, &doc()).unwrap();
        assert_eq!(
            out,
            json!({
                "envvar": "hi",
                "static": "untouched",
                "nested": {"deep": 1},
                "list": [1, 2],
                "number": 42,
            })
        );
    }

    #[test]
    fn evaluation_is_referentially_transparent_over_clones() {
        let a = doc();
        let b = a.clone();
        assert_eq!(
            evaluate_str("${ .data.a + 1 }", &a).unwrap(),
            evaluate_str("${ .data.a + 1 }", &b).unwrap()
        );
    }
}
