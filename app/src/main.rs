use clap::{Parser, Subcommand};
use cw_config::Config;
use cw_core::telemetry;
use cw_core::{Error, Result};
use cw_exec::Executor;
use cw_jobmgr::JobManager;
use cw_logsink::{AlertSender, LogSink, MongoLogStore, SinkOptions, SmtpMailer};
use cw_registry::WorkerRegistry;
use cw_sched::Scheduler;
use etcd_client::ConnectOptions;
use std::{process, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the job event channel between the manager and scheduler.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

#[derive(Parser)]
#[command(name = "cronwork")]
#[command(about = "Distributed cron worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the worker (default)
    Start,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env = std::env::var("CRONWORK_ENV").unwrap_or_else(|_| "development".to_string());
    telemetry::init_tracing(&env, "cronwork");

    // Load configuration - exit with non-zero if invalid
    let config = match Config::load() {
        Ok(config) => {
            tracing::debug!(?config, "Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            tracing::info!("cronwork worker starting");
            if let Err(e) = run_worker(config).await {
                tracing::error!("Worker failed: {}", e);
                process::exit(1);
            }
        }
    }
}

async fn run_worker(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();

    // Coordination store
    let connect_options = ConnectOptions::new()
        .with_connect_timeout(Duration::from_millis(config.etcd.dial_timeout_ms));
    let client = etcd_client::Client::connect(config.etcd.endpoints.clone(), Some(connect_options))
        .await
        .map_err(|e| Error::Store(format!("etcd connect failed: {}", e)))?;
    tracing::info!(endpoints = ?config.etcd.endpoints, "coordination store connected");

    // Log store
    let log_store = MongoLogStore::connect(
        &config.mongodb.uri,
        Duration::from_millis(config.mongodb.connect_timeout_ms),
    )
    .await?;
    tracing::info!("log store connected");

    // Liveness registration; also yields the IP recorded on job logs.
    let registry = WorkerRegistry::new(client.clone(), config.lease.registry_ttl_secs)?;
    let local_ip = registry.local_ip().to_string();
    registry.register(shutdown.clone()).await?;

    // Log sink with optional alert mail
    let mailer: Option<Arc<dyn AlertSender>> = match &config.smtp {
        Some(smtp) => Some(Arc::new(SmtpMailer::new(
            &smtp.host,
            smtp.port,
            &smtp.username,
            &smtp.password,
            &smtp.from,
        )?)),
        None => {
            tracing::warn!("no SMTP configuration, alert mail disabled");
            None
        }
    };
    let sink = LogSink::new(
        Arc::new(log_store),
        mailer,
        SinkOptions {
            batch_size: config.sink.batch_size,
            commit_timeout: Duration::from_millis(config.sink.commit_timeout_ms),
            channel_capacity: config.sink.channel_capacity,
        },
    );
    let appender = sink.start(shutdown.clone());

    // Scheduler fed by the job manager, dispatching into the executor
    let executor = Arc::new(Executor::new(client.clone(), config.lease.lock_ttl_secs));
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let scheduler = Scheduler::new(event_rx, executor, appender, local_ip);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    JobManager::new(client, event_tx)
        .start(shutdown.clone())
        .await?;

    tracing::info!("cronwork worker running");

    wait_for_signal().await;
    tracing::info!("shutdown signal received");

    shutdown.cancel();
    let _ = scheduler_handle.await;
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
