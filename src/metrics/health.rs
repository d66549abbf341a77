//! HTTP server for health probes and Prometheus scraping
//!
//! Routes:
//! - `/` service name, version and the route list
//! - `/health` JSON liveness summary
//! - `/alive`, `/ready` plain-text probes for orchestrators
//! - `/metrics` Prometheus text exposition of the collector registry
//! - `/stats` full health report with pairing statistics

use crate::metrics::collector::MetricsCollector;
use crate::service::app::ServiceContext;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "goban-matchmaker";
const ROUTES: [&str; 5] = ["/health", "/ready", "/alive", "/metrics", "/stats"];

/// Address the health server binds to
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    /// Unset until the service is assembled; probes report unavailable
    pub context: Option<Arc<ServiceContext>>,
}

pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                context: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the service whose health is reported
    pub fn with_context(mut self, context: Arc<ServiceContext>) -> Self {
        self.state.context = Some(context);
        self
    }

    /// Serve until [`HealthServer::stop`] is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", addr))?;
        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Health server was not running");
        }
        Ok(())
    }
}

/// Encode every metric family in `registry` in the Prometheus text format
pub fn render_metrics(registry: &Registry) -> Result<String> {
    let metric_families = registry.gather();
    TextEncoder::new()
        .encode_to_string(&metric_families)
        .context("Failed to encode metrics")
}

/// Degraded still serves traffic; only unhealthy is unavailable
fn probe_status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ROUTES,
    }))
}

async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let status = match &state.context {
        Some(context) => HealthCheck::liveness_check(context.clone())
            .await
            .unwrap_or(HealthStatus::Unhealthy),
        None => HealthStatus::Unhealthy,
    };
    debug!("Health probe: {}", status);

    let mut body = json!({
        "status": status,
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    });
    if state.context.is_none() {
        body["error"] = json!("Service not initialized");
    }

    (probe_status_code(status), Json(body))
}

async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let Some(context) = &state.context else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized");
    };

    match HealthCheck::readiness_check(context.clone()).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "Ready"),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded but ready"),
        Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
        Err(e) => {
            error!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
        }
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let alive = match &state.context {
        Some(context) => matches!(
            HealthCheck::liveness_check(context.clone()).await,
            Ok(HealthStatus::Healthy)
        ),
        None => false,
    };

    if alive {
        (StatusCode::OK, "Alive")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not alive")
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    match render_metrics(&state.metrics_collector.registry()) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("{:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

async fn stats_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let report = match &state.context {
        Some(context) => HealthCheck::check(context.clone())
            .await
            .map_err(|e| format!("Failed to get service stats: {}", e)),
        None => Err("Service not initialized".to_string()),
    };

    match report {
        Ok(health) => (
            StatusCode::OK,
            Json(json!({
                "service": {
                    "name": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "status": health.status,
                    "uptime": health.stats.uptime_info,
                },
                "requests": {
                    "pending": health.stats.requests_pending,
                },
                "pairings": {
                    "active": health.stats.pairings_active,
                    "created": health.stats.pairings_created,
                    "rejected": health.stats.pairings_rejected,
                },
                "components": health.checks,
                "timestamp": chrono::Utc::now(),
            })),
        ),
        Err(reason) => {
            warn!("Stats unavailable: {}", reason);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "service": { "name": SERVICE_NAME, "status": "error" },
                    "error": reason,
                    "timestamp": chrono::Utc::now(),
                })),
            )
        }
    }
}
