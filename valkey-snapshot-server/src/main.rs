/*!
valkey-snapshot - scheduled Valkey/Redis snapshots shipped to object storage.

Runs the capture scheduler next to a small read-only HTTP surface. The
`check` and `once` subcommands validate a configuration or run a single
round without starting the service.
*/

mod http;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use valkey_snapshot_core::{
    create_store, load_config, observability::init_observability, parse_interval, Orchestrator,
    RetryPolicy, Scheduler, ServerConfig, SnapshotError, StoreCapturer, UploadSink,
};

#[derive(Parser)]
#[command(name = "valkey-snapshot")]
#[command(about = "Scheduled Valkey/Redis snapshots to object storage")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "VALKEY_SNAPSHOT_CONFIG",
        default_value = "config.yml"
    )]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Override the configured interval between rounds (e.g. `15m`)
    #[arg(long, global = true)]
    interval: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Run the scheduler and the HTTP surface (default)
    Serve,
    /// Validate the configuration and print it with credentials masked
    Check,
    /// Run a single round, print its report and exit
    Once,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_observability(cli.verbose, cli.json_logs)?;

    let config = load(&cli)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await?,
        Commands::Check => check(&config)?,
        Commands::Once => once(config).await?,
    }

    Ok(())
}

fn load(cli: &Cli) -> Result<ServerConfig, anyhow::Error> {
    let mut config = load_config(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(raw) = &cli.interval {
        config.interval = parse_interval(raw)?;
    }
    Ok(config)
}

async fn build_orchestrator(config: &ServerConfig) -> Result<Orchestrator, anyhow::Error> {
    let backend = config
        .backend
        .as_ref()
        .ok_or_else(|| SnapshotError::config("backend must be defined"))?;
    let store = create_store(backend).await?;
    let sink = UploadSink::new(store, config.timestamp_format())
        .with_retry_policy(RetryPolicy::with_retries(config.upload_retries));
    info!(destination = %sink.destination(), "Storage backend ready");

    Ok(Orchestrator::new(Arc::new(StoreCapturer), Arc::new(sink)).with_overlap(config.overlap))
}

async fn serve(config: ServerConfig) -> Result<(), anyhow::Error> {
    let orchestrator = Arc::new(build_orchestrator(&config).await?);
    let scheduler = Scheduler::new(config.interval)?;

    let endpoints = Arc::new(config.endpoints.clone());
    let rounds = Arc::clone(&orchestrator);
    let scheduler_task = tokio::spawn(async move {
        scheduler
            .run(move || {
                let orchestrator = Arc::clone(&rounds);
                let endpoints = Arc::clone(&endpoints);
                async move {
                    orchestrator.run_round(&endpoints).await;
                }
            })
            .await
    });

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(address = %addr, endpoints = config.endpoints.len(), "Starting valkey-snapshot");

    let app = http::router(http::AppState::new(&config, orchestrator));

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result.context("HTTP server failed")?;
        }
        result = scheduler_task => {
            result.context("scheduler stopped")?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for shutdown signal")?;
            info!("Shutting down");
        }
    }

    Ok(())
}

fn check(config: &ServerConfig) -> Result<(), anyhow::Error> {
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

async fn once(config: ServerConfig) -> Result<(), anyhow::Error> {
    let orchestrator = build_orchestrator(&config).await?;
    let report = orchestrator.run_round(&config.endpoints).await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failed > 0 {
        error!(failed = report.failed, "Round finished with failures");
        bail!("{} of {} endpoints failed", report.failed, report.endpoints.len());
    }
    Ok(())
}
