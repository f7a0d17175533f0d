//! Controller metrics and probe endpoints.
//!
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /healthz`: 200 while the process is up
//! - `GET /readyz`: 200 once the caches have synced, 503 before

use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Outcome label of `shadow_reconcile_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    Success,
    /// Failed and requeued with back-off
    Retry,
    /// Failed permanently or out of retries
    Dropped,
}

impl ReconcileResult {
    /// Label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileResult::Success => "success",
            ReconcileResult::Retry => "retry",
            ReconcileResult::Dropped => "dropped",
        }
    }
}

/// Controller metrics registry
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_duration: Histogram,
    queue_depth: IntGauge,
    ready: AtomicBool,
}

impl Metrics {
    /// Creates the registry and registers every metric.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("shadow_reconcile_total", "Total number of Shadow reconciliations"),
            &["result"],
        )?;
        let reconcile_duration = Histogram::with_opts(HistogramOpts::new(
            "shadow_reconcile_duration_seconds",
            "Shadow reconciliation duration in seconds",
        ))?;
        let queue_depth = IntGauge::new("shadow_workqueue_depth", "Keys waiting in the work queue")?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            queue_depth,
            ready: AtomicBool::new(false),
        })
    }

    /// Record one reconcile pass
    pub fn record_reconcile(&self, result: ReconcileResult, duration: Duration) {
        self.reconcile_total.with_label_values(&[result.as_str()]).inc();
        self.reconcile_duration.observe(duration.as_secs_f64());
    }

    #[cfg(test)]
    pub fn reconcile_count(&self, result: ReconcileResult) -> u64 {
        self.reconcile_total.with_label_values(&[result.as_str()]).get()
    }

    /// Publish the number of waiting keys.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Mark the caches as synced.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Whether the caches have synced.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ControllerError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

/// Router serving metrics and probes
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> (StatusCode, &'static str) {
    if metrics.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "caches not synced")
    }
}

/// Serve metrics and probes on `addr` until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Serving metrics and probes");
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Metrics server stopped");
    Ok(())
}
