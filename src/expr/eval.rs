//! Interpreter for the parsed query AST.

use serde_json::Value;
use uuid::Uuid;

use super::parser::{number_value, BinOp, Expr, PathRoot, Segment};
use super::ExpressionError;

pub(crate) fn eval(expr: &Expr, doc: &Value) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path { root, segments } => {
            let start = match root {
                PathRoot::Identity => doc.clone(),
                PathRoot::Variable(name) => doc.get(name).cloned().unwrap_or(Value::Null),
            };
            navigate(start, segments)
        }
        Expr::Call { name, args } => {
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(eval(arg, doc)?);
            }
            call_builtin(name, &evaluated)
        }
        Expr::Neg(inner) => {
            let value = eval(inner, doc)?;
            match value.as_f64() {
                Some(n) => Ok(number_value(-n)),
                None => Err(ExpressionError::Eval(format!(
                    "cannot negate non-number: {value}"
                ))),
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, doc),
    }
}

/// Walk path segments. Missing object keys produce `null` (so gates can
/// compare against absent data); indexing a non-container is an error.
fn navigate(mut current: Value, segments: &[Segment]) -> Result<Value, ExpressionError> {
    for segment in segments {
        current = match (&current, segment) {
            (Value::Null, _) => Value::Null,
            (Value::Object(map), Segment::Field(name)) => {
                map.get(name).cloned().unwrap_or(Value::Null)
            }
            (Value::Array(items), Segment::Index(idx)) => {
                let i = if *idx < 0 {
                    items.len() as i64 + idx
                } else {
                    *idx
                };
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .unwrap_or(Value::Null)
            }
            (other, Segment::Field(name)) => {
                return Err(ExpressionError::Eval(format!(
                    "cannot index {} with \"{name}\"",
                    type_name(other)
                )))
            }
            (other, Segment::Index(_)) => {
                return Err(ExpressionError::Eval(format!(
                    "cannot index {} with number",
                    type_name(other)
                )))
            }
        };
    }
    Ok(current)
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, doc: &Value) -> Result<Value, ExpressionError> {
    // Short-circuit boolean operators on truthiness
    if matches!(op, BinOp::And | BinOp::Or) {
        let left = truthy(&eval(lhs, doc)?);
        return match (op, left) {
            (BinOp::And, false) => Ok(Value::Bool(false)),
            (BinOp::Or, true) => Ok(Value::Bool(true)),
            _ => Ok(Value::Bool(truthy(&eval(rhs, doc)?))),
        };
    }

    let left = eval(lhs, doc)?;
    let right = eval(rhs, doc)?;

    match op {
        BinOp::Eq => Ok(Value::Bool(loose_eq(&left, &right))),
        BinOp::Ne => Ok(Value::Bool(!loose_eq(&left, &right))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, &left, &right),
        BinOp::Add => add(&left, &right),
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => arithmetic(op, &left, &right),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

/// `false` and `null` are falsy; everything else is truthy.
fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Equality with numeric coercion so `1 == 1.0` holds.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    let ordering = match (left, right) {
        (Value::String(l), Value::String(r)) => l.cmp(r),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(l), Some(r)) => l
                .partial_cmp(&r)
                .ok_or_else(|| ExpressionError::Eval("incomparable numbers".to_string()))?,
            _ => {
                return Err(ExpressionError::Eval(format!(
                    "cannot compare {} with {}",
                    type_name(left),
                    type_name(right)
                )))
            }
        },
    };

    let result = match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn add(left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    match (left, right) {
        (Value::Null, other) | (other, Value::Null) => Ok(other.clone()),
        (Value::String(l), Value::String(r)) => Ok(Value::String(format!("{l}{r}"))),
        (Value::Array(l), Value::Array(r)) => {
            let mut out = l.clone();
            out.extend(r.iter().cloned());
            Ok(Value::Array(out))
        }
        (Value::Object(l), Value::Object(r)) => {
            let mut out = l.clone();
            for (k, v) in r {
                out.insert(k.clone(), v.clone());
            }
            Ok(Value::Object(out))
        }
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(l), Some(r)) => Ok(number_value(l + r)),
            _ => Err(ExpressionError::Eval(format!(
                "cannot add {} and {}",
                type_name(left),
                type_name(right)
            ))),
        },
    }
}

fn arithmetic(op: BinOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
        return Err(ExpressionError::Eval(format!(
            "arithmetic requires numbers, got {} and {}",
            type_name(left),
            type_name(right)
        )));
    };

    let result = match op {
        BinOp::Sub => l - r,
        BinOp::Mul => l * r,
        BinOp::Div => {
            if r == 0.0 {
                return Err(ExpressionError::Eval("division by zero".to_string()));
            }
            l / r
        }
        BinOp::Rem => {
            if r == 0.0 {
                return Err(ExpressionError::Eval("division by zero".to_string()));
            }
            l % r
        }
        _ => unreachable!(),
    };
    Ok(number_value(result))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Builtins callable from expressions. These run inside the engine's
/// side-effect primitive when evaluated from a workflow body, so they may
/// be non-deterministic.
fn call_builtin(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    match name {
        "uuid" => {
            if !args.is_empty() {
                return Err(ExpressionError::Eval(
                    "uuid takes no arguments".to_string(),
                ));
            }
            Ok(Value::String(Uuid::new_v4().to_string()))
        }
        _ => Err(ExpressionError::UnknownFunction(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::super::Query;
    use super::*;
    use serde_json::json;

    fn run(src: &str, doc: &Value) -> Result<Value, ExpressionError> {
        Query::parse(src).unwrap().run(doc)
    }

    #[test]
    fn identity_returns_document() {
        let doc = json!({"a": 1});
        assert_eq!(run(".", &doc).unwrap(), doc);
    }

    #[test]
    fn negative_index_counts_from_end() {
        let doc = json!({"items": [1, 2, 3]});
        assert_eq!(run(".items[-1]", &doc).unwrap(), json!(3));
    }

    #[test]
    fn out_of_bounds_index_is_null() {
        let doc = json!({"items": [1]});
        assert_eq!(run(".items[5]", &doc).unwrap(), Value::Null);
    }

    #[test]
    fn null_propagates_through_paths() {
        let doc = json!({});
        assert_eq!(run(".a.b.c", &doc).unwrap(), Value::Null);
    }

    #[test]
    fn indexing_scalar_is_an_error() {
        let doc = json!({"a": 5});
        assert!(run(".a.b", &doc).is_err());
    }

    #[test]
    fn numeric_equality_is_loose() {
        let doc = json!({"a": 1});
        assert_eq!(run(".a == 1.0", &doc).unwrap(), json!(true));
    }

    #[test]
    fn string_comparison_is_lexicographic() {
        let doc = json!({});
        assert_eq!(run("\"abc\" < \"abd\"", &doc).unwrap(), json!(true));
    }

    #[test]
    fn arithmetic_operations() {
        let doc = json!({"n": 10});
        assert_eq!(run(".n + 5", &doc).unwrap(), json!(15));
        assert_eq!(run(".n - 3", &doc).unwrap(), json!(7));
        assert_eq!(run(".n * 2", &doc).unwrap(), json!(20));
        assert_eq!(run(".n / 4", &doc).unwrap(), json!(2.5));
        assert_eq!(run(".n % 3", &doc).unwrap(), json!(1));
    }

    #[test]
    fn division_by_zero_errors() {
        let doc = json!({"n": 1});
        assert!(run(".n / 0", &doc).is_err());
    }

    #[test]
    fn string_concat_via_add() {
        let doc = json!({"name": "world"});
        assert_eq!(
            run("\"hello \" + .name", &doc).unwrap(),
            json!("hello world")
        );
    }

    #[test]
    fn null_add_is_identity() {
        let doc = json!({});
        assert_eq!(run(".missing + 5", &doc).unwrap(), json!(5));
    }

    #[test]
    fn truthiness_of_and_or() {
        let doc = json!({"present": "yes"});
        assert_eq!(run(".present and true", &doc).unwrap(), json!(true));
        assert_eq!(run(".missing or false", &doc).unwrap(), json!(false));
        assert_eq!(run(".missing or .present", &doc).unwrap(), json!(true));
    }

    #[test]
    fn variable_roots_resolve_top_level_slots() {
        let doc = json!({"env": {"KEY": "value"}});
        assert_eq!(run("$env.KEY", &doc).unwrap(), json!("value"));
        assert_eq!(run("$missing", &doc).unwrap(), Value::Null);
    }

    #[test]
    fn uuid_rejects_arguments() {
        let doc = json!({});
        assert!(run("uuid(1)", &doc).is_err());
    }
}
