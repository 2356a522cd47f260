mod api;
mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use procstream_logs::{LogBroadcaster, LogPipeline, LogStreamer, ProcessLogSource};
use procstream_sinks::{LogStore, MemoryLogStore, Notifier, SledLogStore, WebhookNotifier};

use crate::config::Config;

/// procstream - tail a managed process's logs, keep them, and alert on errors
#[derive(Parser, Debug)]
#[command(name = "procstream")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file (defaults to ./procstream.toml if present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address for the control API
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Boot with streaming disabled regardless of the config file
    #[arg(long)]
    disabled: bool,

    /// Tracing filter directive, e.g. "debug" or "procstream_logs=trace"
    #[arg(long, value_name = "FILTER")]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.http.bind = bind;
    }
    if args.disabled {
        config.streamer.enabled = false;
    }
    if let Some(filter) = args.log_filter {
        config.logging.filter = filter;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(config).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(config: Config) -> Result<()> {
    // Keep a typed handle on the sled store so it can be flushed at exit
    let sled_store = match &config.store.path {
        Some(path) => Some(
            SledLogStore::open(path)
                .with_context(|| format!("Failed to open log store at {}", path.display()))?,
        ),
        None => None,
    };
    let store: Arc<dyn LogStore> = match &sled_store {
        Some(store) => Arc::new(store.clone()),
        None => {
            let memory = MemoryLogStore::with_capacity(config.store.memory_capacity);
            tracing::warn!(
                capacity = memory.capacity(),
                "no store path configured; logs are kept in memory only"
            );
            Arc::new(memory)
        }
    };

    let webhook = WebhookNotifier::new(config.notifier.clone())
        .context("Failed to build webhook client")?;
    if !webhook.is_configured() {
        tracing::info!("no webhook configured; error notifications are off");
    }
    let notifier: Arc<dyn Notifier> = Arc::new(webhook);

    let pipeline = LogPipeline::new(
        store,
        notifier,
        LogBroadcaster::new(config.streamer.subscriber_capacity),
    );
    let source = Arc::new(ProcessLogSource::new(config.streamer.command()));
    let streamer = LogStreamer::new(config.streamer.settings(config.reconnect), source, pipeline);

    streamer.start().await;

    let listener = tokio::net::TcpListener::bind(config.http.bind)
        .await
        .with_context(|| format!("Failed to bind control API on {}", config.http.bind))?;
    tracing::info!(addr = %config.http.bind, "control API listening");

    let app = api::router(api::ApiState {
        streamer: streamer.clone(),
        max_recent: config.http.max_recent,
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Control API failed")?;

    tracing::info!("shutting down");
    streamer.shutdown().await;
    if let Some(store) = sled_store {
        store.flush().await.context("Failed to flush log store")?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
