//! Windlass - Serverless Workflow DSL interpreter for durable-execution
//! engines
//!
//! ## Architecture
//!
//! - `document`: serde model of the Serverless Workflow v1.0.0 subset
//! - `loader`: YAML loading with DSL-version gating
//! - `validation`: unsupported-kind and search-attribute checks
//! - `state`: the four-slot execution state (data/env/input/output)
//! - `expr`: strict `${ … }` expression evaluation (jq-style subset)
//! - `attributes`: typed search-attribute coercion
//! - `tasks`: one builder per task kind + the sequence executor
//! - `http`: the HTTP call activity
//! - `engine`: the durable-engine capability surface + local in-process
//!   implementation
//! - `schedules`: schedule reconciliation
//! - `worker`: the registrar tying compiled trees to engine names
//! - `health`: liveness/readiness endpoint
//! - `error`: top-level error types

pub mod attributes;
pub mod document;
pub mod duration;
pub mod engine;
pub mod error;
pub mod expr;
pub mod health;
pub mod http;
pub mod loader;
pub mod schedules;
pub mod state;
pub mod tasks;
pub mod validation;
pub mod worker;

pub use document::Document;
pub use error::{Error, ValidationError};
pub use loader::{load_from_file, load_from_str};
pub use state::State;
pub use validation::validate;
pub use worker::{build_registry, load_envvars};
