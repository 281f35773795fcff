//! The four-slot execution state threaded through every task.
//!
//! - `data`: mutable scratch shared across tasks in a sequence
//! - `env`: seeded once from the prefixed process environment, then immutable
//! - `input`: the caller-supplied payload, may be absent
//! - `output`: accumulator for exported task results, returned as the
//!   workflow result
//!
//! Every concurrent body (fork branch, child workflow) receives a deep
//! clone so in-task mutations never bleed across siblings; results are
//! merged back through [`State::add_output`] after a successful join.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::TaskBase;
use crate::expr;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct State {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub env: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Map<String, Value>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the environment slot. Called once at workflow start; values are
    /// plain strings lifted into the value model.
    pub fn set_env(&mut self, env: impl IntoIterator<Item = (String, String)>) {
        self.env = env
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
    }

    pub fn set_input(&mut self, input: Value) {
        self.input = Some(input);
    }

    /// Shallow-merge a map into the `data` slot.
    pub fn add_data(&mut self, data: Map<String, Value>) {
        for (k, v) in data {
            self.data.insert(k, v);
        }
    }

    pub fn add_data_entry(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Record a task result in the `output` slot, but only when the task
    /// declares `export.as`. The output key is the expression body with the
    /// `${ … }` wrapper stripped. Returns whether anything was recorded.
    pub fn add_output(&mut self, base: &TaskBase, value: Value) -> bool {
        let Some(export) = &base.export else {
            return false;
        };

        let key = expr::sanitize(&export.r#as).trim().to_string();
        if key.is_empty() {
            return false;
        }

        self.output.insert(key, value);
        true
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
    }

    /// Project the four slots into the map used as the root document for
    /// expression evaluation. An absent input appears as `null`.
    pub fn as_map(&self) -> Value {
        let mut map = Map::with_capacity(4);
        map.insert("data".to_string(), Value::Object(self.data.clone()));
        map.insert("env".to_string(), Value::Object(self.env.clone()));
        map.insert(
            "input".to_string(),
            self.input.clone().unwrap_or(Value::Null),
        );
        map.insert("output".to_string(), Value::Object(self.output.clone()));
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Export;
    use serde_json::json;

    fn base_with_export(expr: &str) -> TaskBase {
        TaskBase {
            export: Some(Export {
                r#as: expr.to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn add_data_merges_shallow() {
        let mut state = State::new();
        state.add_data(json!({"a": 1}).as_object().unwrap().clone());
        state.add_data(json!({"b": 2, "a": 3}).as_object().unwrap().clone());

        assert_eq!(state.data["a"], 3);
        assert_eq!(state.data["b"], 2);
    }

    #[test]
    fn add_output_requires_export() {
        let mut state = State::new();
        let recorded = state.add_output(&TaskBase::default(), json!("result"));
        assert!(!recorded);
        assert!(state.output.is_empty());
    }

    #[test]
    fn add_output_strips_expression_wrapper() {
        let mut state = State::new();
        let base = base_with_export("${ myKey }");
        assert!(state.add_output(&base, json!({"n": 1})));
        assert_eq!(state.output["myKey"], json!({"n": 1}));
    }

    #[test]
    fn add_output_accepts_bare_key() {
        let mut state = State::new();
        let base = base_with_export("plain");
        assert!(state.add_output(&base, json!(42)));
        assert_eq!(state.output["plain"], json!(42));
    }

    #[test]
    fn clone_is_deep() {
        let mut state = State::new();
        state.add_data_entry("nested", json!({"inner": [1, 2, 3]}));

        let mut cloned = state.clone();
        cloned.data.get_mut("nested").unwrap()["inner"][0] = json!(99);

        assert_eq!(state.data["nested"]["inner"][0], 1);
        assert_eq!(cloned.data["nested"]["inner"][0], 99);
    }

    #[test]
    fn as_map_projects_four_slots() {
        let mut state = State::new();
        state.set_env([("EXAMPLE".to_string(), "hi".to_string())]);
        state.set_input(json!({"orderType": "electronic"}));
        state.add_data_entry("a", json!(1));

        let map = state.as_map();
        assert_eq!(map["data"]["a"], 1);
        assert_eq!(map["env"]["EXAMPLE"], "hi");
        assert_eq!(map["input"]["orderType"], "electronic");
        assert_eq!(map["output"], json!({}));
    }

    #[test]
    fn as_map_absent_input_is_null() {
        let state = State::new();
        assert_eq!(state.as_map()["input"], Value::Null);
    }

    #[test]
    fn clone_roundtrips_through_as_map() {
        let mut state = State::new();
        state.set_env([("KEY".to_string(), "value".to_string())]);
        state.add_data_entry("x", json!([1, 2]));
        state.set_input(json!("payload"));

        assert_eq!(state.as_map(), state.clone().as_map());
    }

    #[test]
    fn serializes_without_absent_input() {
        let state = State::new();
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("input").is_none());
        assert_eq!(json["data"], json!({}));
    }
}
