//! upstream-dispatch
//!
//! Command-line front end for the dispatch layer.
//!
//! ```text
//!   stdin (JSON lines)                                        stdout (JSON lines)
//!   ─────────────────▶ parse ─▶ task per request ─▶ Dispatcher ─▶ result line ─▶
//!                                                       │
//!                                          ┌────────────┼─────────────┐
//!                                          ▼            ▼             ▼
//!                                   idempotency    credential     retry executor
//!                                      cache          pool        + breakers
//!                                                                     │
//!                                                                     ▼
//!                                                              HttpUpstream
//!
//!   config watcher ─▶ rebuild_pool        maintenance ─▶ sweep caches, log stats
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use upstream_dispatch::config::{load_config, ConfigWatcher, CredentialReload};
use upstream_dispatch::dispatch::Dispatcher;
use upstream_dispatch::lifecycle::{process_lines, signals, MaintenanceTask, Shutdown};
use upstream_dispatch::observability::{logging, metrics};
use upstream_dispatch::upstream::HttpUpstream;

#[derive(Parser)]
#[command(name = "upstream-dispatch")]
#[command(about = "Dispatch requests to a rate-limited upstream through a credential pool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print a summary
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Dispatch JSON-line requests read from stdin
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// One request line on stdin.
#[derive(Debug, Deserialize)]
struct RequestLine {
    #[serde(default)]
    id: Option<Value>,
    operation: String,
    path: String,
    #[serde(default)]
    body: Value,
    #[serde(default)]
    idempotency_token: Option<String>,
}

/// One result line on stdout.
#[derive(Debug, Serialize)]
struct ResponseLine {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    operation: String,
    status: u16,
    cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => check(&config),
        Commands::Run { config } => run(&config).await,
    }
}

fn check(path: &Path) -> Result<(), BoxError> {
    let config = load_config(path)?;
    println!("Configuration OK: {}", path.display());
    println!("  credentials: {}", config.credentials.len());
    for op in &config.operations {
        println!(
            "  operation {}: service={} ttl={}s capacity={} cache={}",
            op.name,
            op.service,
            op.cache_ttl_secs,
            op.cache_capacity,
            if op.cache_enabled { "on" } else { "off" }
        );
    }
    println!(
        "  retries: {} attempts, {}ms initial, x{}, {}ms max",
        config.retries.max_attempts, config.retries.initial_delay_ms, config.retries.multiplier, config.retries.max_delay_ms
    );
    println!("  upstream: {}", config.upstream.base_url);
    Ok(())
}

async fn run(path: &Path) -> Result<(), BoxError> {
    let config = load_config(path)?;
    logging::init_logging(&config.observability);

    tracing::info!(
        config = %path.display(),
        credentials = config.credentials.len(),
        operations = config.operations.len(),
        upstream = %config.upstream.base_url,
        "upstream-dispatch starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let dispatcher: Arc<Dispatcher<Value>> = Arc::new(Dispatcher::from_config(&config)?);
    let upstream = Arc::new(HttpUpstream::from_config(&config.upstream)?);
    let shutdown = Shutdown::new();

    tokio::spawn(signals::shutdown_on_ctrl_c(shutdown.clone()));
    tokio::spawn(MaintenanceTask::new(dispatcher.clone(), &config.maintenance).run(shutdown.subscribe()));

    // The watcher stops when this guard is dropped.
    let (watcher, reloads) = ConfigWatcher::new(path, config.clone());
    let _watch_guard = match watcher.run() {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };
    tokio::spawn(apply_reloads(dispatcher.clone(), reloads, shutdown.subscribe()));

    let (out_tx, out_rx) = mpsc::unbounded_channel::<ResponseLine>();
    let writer = tokio::spawn(write_responses(out_rx));

    let summary = {
        let dispatcher = dispatcher.clone();
        let out_tx = out_tx.clone();
        process_lines(
            BufReader::new(tokio::io::stdin()),
            move |line| {
                let dispatcher = dispatcher.clone();
                let upstream = upstream.clone();
                let out_tx = out_tx.clone();
                async move {
                    let response = handle_line(&dispatcher, &upstream, &line).await;
                    let _ = out_tx.send(response);
                }
            },
            shutdown.subscribe(),
        )
        .await
    };
    tracing::info!(
        received = summary.received,
        completed = summary.completed,
        abandoned = summary.abandoned,
        "Request intake finished"
    );

    shutdown.trigger();
    drop(out_tx);
    let _ = writer.await;

    let stats = serde_json::to_string(&dispatcher.stats())?;
    println!("{{\"stats\":{stats}}}");
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn handle_line(dispatcher: &Dispatcher<Value>, upstream: &HttpUpstream, line: &str) -> ResponseLine {
    let request: RequestLine = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return ResponseLine {
                id: None,
                operation: String::new(),
                status: 400,
                cached: false,
                result: None,
                error: Some(format!("invalid request line: {e}")),
            }
        }
    };

    let outcome = dispatcher
        .dispatch(&request.operation, request.idempotency_token.as_deref(), |lease| {
            let path = request.path.as_str();
            let body = &request.body;
            async move { upstream.post_json(&lease, path, body).await }
        })
        .await;

    match outcome {
        Ok(outcome) => {
            let cached = outcome.is_cached();
            ResponseLine {
                id: request.id,
                operation: request.operation,
                status: 200,
                cached,
                result: Some(outcome.into_inner()),
                error: None,
            }
        }
        Err(e) => ResponseLine {
            id: request.id,
            operation: request.operation,
            status: e.status_code(),
            cached: false,
            result: None,
            error: Some(e.to_string()),
        },
    }
}

async fn apply_reloads(
    dispatcher: Arc<Dispatcher<Value>>,
    mut reloads: mpsc::UnboundedReceiver<CredentialReload>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            reload = reloads.recv() => {
                let Some(reload) = reload else { break };
                if let Err(e) = dispatcher.rebuild_pool(&reload.credentials) {
                    tracing::error!(error = %e, "Rejected credential reload, keeping current pool");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn write_responses(mut rx: mpsc::UnboundedReceiver<ResponseLine>) {
    let mut stdout = tokio::io::stdout();
    while let Some(response) = rx.recv().await {
        let mut line = match serde_json::to_vec(&response) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode response");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = stdout.write_all(&line).await {
            tracing::error!(error = %e, "Failed to write response");
            break;
        }
    }
    let _ = stdout.flush().await;
}
