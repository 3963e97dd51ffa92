//! Subcommand handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::models::{Config, IngestionEvent, JobStoreDriver};
use crate::pipeline::{ChannelBroker, PipelineController, RetryPolicy, RetryQueue};
use crate::services::{
    Chunker, EmbeddingOrchestrator, FsDocumentSource, HttpEmbeddingProvider, PgJobStore,
    VectorWriter, create_backend, create_job_store,
};

/// An `InProgress` claim untouched for this long is treated as abandoned
/// by a crashed worker and recovered at startup.
const STALE_CLAIM_SECS: i64 = 300;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Tenant owning the document
    #[arg(long)]
    pub tenant: String,

    /// Document identifier
    #[arg(long)]
    pub document: String,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration
    Show,

    /// Write a default config file to the platform config directory
    Init,
}

pub async fn handle_run(config: Config) -> Result<()> {
    let store = create_job_store(&config.job_store)
        .await
        .context("failed to create job store")?;
    let backend = create_backend(&config.vector_store)
        .await
        .context("failed to create vector store backend")?;
    backend
        .ensure_ready()
        .await
        .context("vector store not ready")?;

    let provider =
        Arc::new(HttpEmbeddingProvider::new(&config.embedding).context("invalid embedding config")?);
    let orchestrator = EmbeddingOrchestrator::new(
        provider,
        config.worker.concurrency_limit,
        Duration::from_secs(config.embedding.timeout_secs),
    );
    let chunker = Chunker::from_config(&config.chunking)?;
    let retry_queue = Arc::new(RetryQueue::new());

    let controller = PipelineController::new(
        store.clone(),
        VectorWriter::new(backend),
        orchestrator,
        chunker,
        Arc::new(FsDocumentSource::new(&config.worker.storage_root)),
        RetryPolicy::from_config(&config.retry),
        retry_queue,
    );

    let stale_before = chrono::Utc::now() - chrono::Duration::seconds(STALE_CLAIM_SECS);
    let stranded = store
        .fetch_recoverable(stale_before)
        .await
        .context("failed to sweep unfinished jobs")?;
    if !stranded.is_empty() {
        info!(jobs = stranded.len(), "recovering unfinished jobs from previous run");
        controller.recover_jobs(stranded).await;
    }

    let (publisher, broker) = ChannelBroker::channel(config.worker.queue_capacity);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<IngestionEvent>(line) {
                        Ok(event) => {
                            if publisher.publish(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "skipping malformed event line"),
                    }
                }
                Ok(None) => {
                    info!("stdin closed, no further events will be accepted");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read event line");
                    break;
                }
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    controller.run(Arc::new(broker), shutdown_rx).await?;
    Ok(())
}

pub async fn handle_migrate(config: Config) -> Result<()> {
    match config.job_store.driver {
        JobStoreDriver::Postgres => {
            let store = PgJobStore::connect(&config.job_store)
                .await
                .context("failed to connect to job store")?;
            store.migrate().await?;
            println!("job store schema up to date");
        }
        JobStoreDriver::Memory => {
            println!("memory job store needs no migration");
        }
    }

    let backend = create_backend(&config.vector_store)
        .await
        .context("failed to create vector store backend")?;
    backend.ensure_ready().await?;
    println!("vector collection ready");
    Ok(())
}

pub async fn handle_status(args: StatusArgs, config: Config) -> Result<()> {
    let store = create_job_store(&config.job_store)
        .await
        .context("failed to create job store")?;

    let Some(document) = store.fetch_document(&args.tenant, &args.document).await? else {
        bail!("document {} not found for tenant {}", args.document, args.tenant);
    };
    let counts = store.job_status_counts(&args.tenant, &args.document).await?;

    println!("document: {} ({})", document.id, document.status);
    println!("  queued:        {}", counts.queued);
    println!("  in progress:   {}", counts.in_progress);
    println!("  retry pending: {}", counts.retry_pending);
    println!("  succeeded:     {}", counts.succeeded);
    println!("  dead lettered: {}", counts.dead_lettered);
    Ok(())
}

pub async fn handle_config(command: ConfigCommand, config: Config) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let rendered = toml::to_string_pretty(&config)?;
            println!("{rendered}");
        }
        ConfigCommand::Init => {
            Config::default().save()?;
            match Config::config_path() {
                Some(path) => println!("wrote default config to {}", path.display()),
                None => println!("wrote default config"),
            }
        }
    }
    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
