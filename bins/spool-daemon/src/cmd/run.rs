use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use spool_engine::config::AuthConfig;
use spool_engine::{Grabber, LogSinks, SpoolConfig, Supervisor, Uploader, Workers};

use crate::config::Cli;
use crate::error::DaemonError;

pub async fn run(cli: Cli) -> Result<(), DaemonError> {
    tracing::info!("spool-daemon starting");

    // --- Load config ---
    let mut config = SpoolConfig::load(&cli.config)?;
    tracing::info!(config = %cli.config, "loaded config");

    if let Some(token) = cli.token {
        if token.trim().is_empty() {
            return Err(DaemonError::Config {
                context: "token",
                detail: "stream token is empty".into(),
            });
        }
        config.grabber.auth = AuthConfig::Bearer { token };
    }
    let config = Arc::new(config);

    // --- Directories ---
    config.storage().ensure()?;
    let sinks = LogSinks::new(&config.log_directory);
    sinks.ensure()?;
    tracing::info!(
        storage = %config.storage_directory.display(),
        logs = %config.log_directory.display(),
        stream = %config.grabber.stream_url,
        sink = %config.uploader.upload_url,
        "directories ready"
    );

    // --- Workers ---
    let workers = Workers {
        grabber: Grabber::http(config.clone())?.into_factory(),
        uploader: Uploader::http(config.clone())?.into_factory(),
    };

    // --- Shutdown on Ctrl+C / SIGTERM ---
    let token = CancellationToken::new();
    spawn_signal_listener(token.clone())?;

    tracing::info!("spool-daemon started, press Ctrl+C to stop");
    Supervisor::new(workers, config, sinks).run(token).await;

    tracing::info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
fn spawn_signal_listener(token: CancellationToken) -> Result<(), DaemonError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received, shutting down..."),
            _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down..."),
        }
        token.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_listener(token: CancellationToken) -> Result<(), DaemonError> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        tracing::info!("interrupt received, shutting down...");
        token.cancel();
    });
    Ok(())
}
