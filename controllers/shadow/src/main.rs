//! Shadow Controller
//!
//! Keeps exactly one Pod in existence for every `Shadow` custom resource:
//! - Shadow added or updated: create the named Pod if it is missing
//! - owned Pod deleted: recreate it
//! - Pod name taken by an object the Shadow does not own: report the
//!   conflict and retry with back-off
//!
//! Each Shadow's status records the outcome of the last successful pass.

mod backoff;
mod config;
mod controller;
mod dispatcher;
mod error;
mod key;
mod metrics;
mod queue;
mod reconciler;
mod resources;
mod watcher;
mod worker;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let config = Config::parse();
    init_tracing(config.log_json);

    info!("Starting Shadow Controller");
    config.validate()?;

    // kube's rustls connector needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers: {}", config.workers);
    let backoff = config.backoff();
    info!("  Back-off: {:?} .. {:?}", backoff.base(), backoff.max());
    info!("  Metrics: {}", config.metrics_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    tokio::spawn(handle_signals(shutdown_tx.clone()));

    let metrics = Arc::new(Metrics::new()?);
    let metrics_server = {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(metrics::serve(config.metrics_addr, metrics.clone(), async move {
            controller::wait_for_shutdown(&mut shutdown).await;
        }))
    };

    let result = match Controller::new(config, metrics).await {
        Ok(controller) => controller.run(shutdown_rx).await,
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        error!("Shadow Controller failed: {}", e);
    }

    stop_metrics_server(&shutdown_tx, metrics_server).await;
    result
}

/// Flip the shutdown flag and wait for the metrics server to drain.
///
/// The controller may stop on its own (failed cache sync, failed watch)
/// while the signal handler still holds the flag unset.
async fn stop_metrics_server(
    shutdown: &watch::Sender<bool>,
    server: JoinHandle<Result<(), ControllerError>>,
) {
    shutdown.send_replace(true);
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Metrics server failed: {}", e),
        Err(e) => error!("Metrics server task failed: {}", e),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// First SIGINT/SIGTERM requests a graceful shutdown; a second one exits
/// immediately with status 1.
async fn handle_signals(shutdown: Arc<watch::Sender<bool>>) {
    if let Err(e) = wait_for_signal().await {
        error!("Failed to listen for shutdown signals: {}", e);
        return;
    }
    info!("Received shutdown signal");
    shutdown.send_replace(true);

    if wait_for_signal().await.is_ok() {
        error!("Received second shutdown signal, exiting");
        std::process::exit(1);
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
