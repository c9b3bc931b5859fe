//! Lumen relay server binary.

use std::process::ExitCode;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use lumen_app_server::config::normalize_upstream_url;
use lumen_app_server::{ServerConfig, run_with_shutdown};

/// Lumen streaming chat relay
#[derive(Parser)]
#[command(name = "lumen-server")]
#[command(about = "Streams local model output to chat clients")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "LUMEN_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Base URL of the inference server
    #[arg(short, long)]
    upstream_url: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config from {path}: {e}"))?,
        None => ServerConfig::from_env()?,
    };

    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(url) = &args.upstream_url {
        config.upstream.base_url = normalize_upstream_url(url);
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.format = "json".to_string();
    }

    Ok(config)
}

async fn shutdown_signal(shutdown_timeout: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown (timeout: {}s)...", shutdown_timeout);
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown (timeout: {}s)...", shutdown_timeout);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            setup_logging("info", args.json_logs);
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    setup_logging(&config.logging.level, config.logging.format == "json");

    info!("Press Ctrl+C to stop");

    let shutdown_timeout = config.shutdown_timeout_duration();
    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown = async move {
        shutdown_signal(shutdown_timeout.as_secs()).await;
        let _ = signalled_tx.send(());
    };

    let server = run_with_shutdown(config, shutdown);
    tokio::pin!(server);

    // In-flight streams get the shutdown window to finish.
    let result = tokio::select! {
        result = &mut server => result,
        _ = async {
            if signalled_rx.await.is_ok() {
                tokio::time::sleep(shutdown_timeout).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!("Shutdown timeout elapsed, dropping open streams");
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}
