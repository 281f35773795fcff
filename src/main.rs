//! Windlass CLI - run a declarative workflow document.
//!
//! Loads and validates the document, reconciles schedules, compiles the
//! task tree into a registry, and drives the root workflow on the
//! in-process engine. Connection and credential flags are carried as
//! [`ConnectOptions`] for deployments that bind a remote durable engine.

use std::collections::HashMap;
use std::process::ExitCode;

use clap::Parser;
use serde_json::json;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use windlass::engine::local::LocalEngine;
use windlass::engine::ConnectOptions;

#[derive(Parser, Debug)]
#[command(name = "windlass")]
#[command(version)]
#[command(about = "Run a worker implementing the Serverless Workflow DSL", long_about = None)]
struct Cli {
    /// Path to workflow file
    #[arg(short, long)]
    file: String,

    /// Load envvars with this prefix into the workflow
    #[arg(long, default_value = "WDLS")]
    env_prefix: String,

    /// Run workflow validation
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    validate: bool,

    /// Enable payload data conversion
    #[arg(long)]
    convert_data: bool,

    /// Path to data conversion keys
    #[arg(long, default_value = "keys.yaml")]
    converter_key_path: String,

    /// Address of health server
    #[arg(long, default_value = "0.0.0.0:3000")]
    health_listen_address: String,

    /// Address of Prometheus metrics server
    #[arg(long, default_value = "0.0.0.0:9090")]
    metrics_listen_address: String,

    /// Prefix for metrics
    #[arg(long, default_value = "")]
    metrics_prefix: String,

    /// Task queue to bind; defaults to the document namespace
    #[arg(long)]
    task_queue: Option<String>,

    /// Address of the durable engine
    #[arg(short = 'H', long, default_value = "localhost:7233")]
    temporal_address: String,

    /// Engine namespace to use
    #[arg(short = 'n', long, default_value = "default")]
    temporal_namespace: String,

    /// API key for engine authentication
    #[arg(long)]
    temporal_api_key: Option<String>,

    /// Path to mTLS client cert, usually ending in .pem
    #[arg(long)]
    tls_client_cert_path: Option<String>,

    /// Path to mTLS client key, usually ending in .key
    #[arg(long)]
    tls_client_key_path: Option<String>,

    /// Enable TLS engine connection
    #[arg(long)]
    temporal_tls: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    // Recover panics at the process boundary and convert to a fatal exit
    match std::panic::catch_unwind(run) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            // The subscriber may not be installed yet; write to stderr
            eprintln!("Fatal error: {err:#}");
            ExitCode::FAILURE
        }
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                format!("{panic:?}")
            };
            eprintln!("Recovered from panic: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let prefix = cli.env_prefix.trim();
    if prefix.is_empty() {
        anyhow::bail!("env-prefix must not be empty");
    }
    if prefix.ends_with('_') {
        anyhow::bail!("env-prefix must not end with an underscore");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_worker(cli))
}

async fn run_worker(cli: Cli) -> anyhow::Result<()> {
    let doc = windlass::load_from_file(&cli.file)?;

    if cli.validate {
        debug!("Running validation");
        let errors = windlass::validate(&doc)?;
        if !errors.is_empty() {
            for err in &errors {
                error!(key = %err.key, message = %err.message, "Validation error");
            }
            anyhow::bail!("validation failed with {} error(s)", errors.len());
        }
        debug!("Validation passed");
    }

    // Carried for deployments binding a remote engine; the in-process
    // engine needs none of it
    let connect = ConnectOptions {
        address: cli.temporal_address.clone(),
        namespace: cli.temporal_namespace.clone(),
        api_key: cli.temporal_api_key.clone(),
        tls: cli.temporal_tls,
        client_cert_path: cli.tls_client_cert_path.clone(),
        client_key_path: cli.tls_client_key_path.clone(),
        converter_key_path: cli.convert_data.then(|| cli.converter_key_path.clone()),
    };
    debug!(address = %connect.address, namespace = %connect.namespace, "Engine connection options");
    debug!(
        address = %cli.metrics_listen_address,
        prefix = %cli.metrics_prefix,
        "Metrics exporter is a deployment concern; not served by the in-process engine"
    );

    // Add underscore to the prefix
    let prefix = format!("{}_", cli.env_prefix.to_uppercase());
    debug!(prefix = %prefix, "Loading envvars to state");
    let envvars: HashMap<String, String> = windlass::load_envvars(&prefix);

    let task_queue = cli
        .task_queue
        .clone()
        .unwrap_or_else(|| doc.task_queue().to_string());

    let registry = windlass::build_registry(&doc, envvars)?;
    let engine = LocalEngine::new(registry, task_queue.clone());

    debug!("Starting health check service");
    let health_address = cli.health_listen_address.clone();
    tokio::spawn(async move {
        if let Err(err) = windlass::health::serve(&health_address).await {
            error!(error = %err, "Health check service failed");
        }
    });

    info!("Updating schedules");
    windlass::schedules::upsert_schedule(engine.schedule_client().as_ref(), &doc, &task_queue)
        .await?;

    info!(task_queue = %task_queue, workflow = %doc.workflow_name(), "Starting workflow");
    let handle = engine.start_workflow(doc.workflow_name(), json!({}), None)?;
    let output = handle.result().await?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
