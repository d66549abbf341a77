//! Metrics and monitoring for the goban-matchmaker service
//!
//! Prometheus collectors for requests, matching and messaging, and the HTTP
//! server that exposes them next to the health probes.

pub mod collector;
pub mod health;

pub use collector::{
    MatchMetrics, MetricsCollector, MetricsTimer, PerformanceMetrics, RequestMetrics,
    ServiceMetrics,
};
pub use health::{render_metrics, HealthServer, HealthServerConfig};

use std::sync::Arc;

/// The collector the service records into, plus the server that exposes it
#[derive(Clone)]
pub struct MetricsService {
    collector: Arc<MetricsCollector>,
    server: Arc<HealthServer>,
}

impl MetricsService {
    pub fn new(collector: Arc<MetricsCollector>, server: Arc<HealthServer>) -> Self {
        Self { collector, server }
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Runs until [`MetricsService::stop`]; spawn it
    pub async fn start(&self) -> anyhow::Result<()> {
        self.server.start().await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.server.stop().await
    }
}
