//! Metrics collection using Prometheus
//!
//! Every metric is registered on the collector's own registry under the
//! `goban_matchmaker_` prefix.

use crate::matching::maker::ScanReport;
use crate::matching::manager::PairingManagerStats;
use crate::types::GameRequestPairing;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    request_metrics: RequestMetrics,
    match_metrics: MatchMetrics,
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Inbound envelopes by type and outcome
    pub messages_total: IntCounterVec,

    /// Outbound events by type and status
    pub events_published_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Game request metrics
#[derive(Clone)]
pub struct RequestMetrics {
    /// Requests accepted into the queue
    pub requests_submitted_total: IntCounter,

    /// Submissions rejected by validation
    pub requests_invalid_total: IntCounter,

    /// Requests currently waiting unpaired
    pub requests_pending: IntGauge,

    /// `try_match` calls by outcome (paired, no_match, error)
    pub match_attempts_total: IntCounterVec,
}

/// Pairing metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Pairings committed, by board size
    pub pairings_created_total: IntCounterVec,

    /// Pairings turned down
    pub pairings_rejected_total: IntCounter,

    /// Pairings awaiting confirmation
    pub pairings_active: IntGauge,

    /// Candidates passed over, by the first field that conflicted
    pub incompatibilities_total: IntCounterVec,

    /// Commits lost to a concurrent writer
    pub claim_conflicts_total: IntCounter,

    /// Candidates evaluated per match attempt
    pub candidates_scanned: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Time spent in a single match attempt
    pub match_duration: Histogram,

    /// Time spent handling one inbound envelope
    pub message_processing_duration: HistogramVec,

    /// Time spent publishing one outbound event
    pub publish_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let request_metrics = RequestMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            request_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn requests(&self) -> &RequestMetrics {
        &self.request_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh the point-in-time gauges from manager stats
    pub fn update_from_stats(&self, stats: &PairingManagerStats) {
        self.request_metrics
            .requests_pending
            .set(stats.requests_pending as i64);
        self.match_metrics
            .pairings_active
            .set(stats.pairings_active as i64);
    }

    pub fn record_request_submitted(&self) {
        self.request_metrics.requests_submitted_total.inc();
    }

    pub fn record_invalid_request(&self) {
        self.request_metrics.requests_invalid_total.inc();
    }

    /// Record one match attempt with its scan counters
    pub fn record_match_attempt(&self, outcome: &str, report: &ScanReport, duration: Duration) {
        self.request_metrics
            .match_attempts_total
            .with_label_values(&[outcome])
            .inc();

        for field in &report.incompatibilities {
            self.match_metrics
                .incompatibilities_total
                .with_label_values(&[field.as_str()])
                .inc();
        }

        self.match_metrics
            .claim_conflicts_total
            .inc_by(report.claim_conflicts as u64);

        self.match_metrics
            .candidates_scanned
            .observe(report.candidates_evaluated as f64);

        self.performance_metrics
            .match_duration
            .observe(duration.as_secs_f64());
    }

    /// Record a match attempt that ended in an error
    pub fn record_match_error(&self, duration: Duration) {
        self.request_metrics
            .match_attempts_total
            .with_label_values(&["error"])
            .inc();

        self.performance_metrics
            .match_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_pairing_created(&self, pairing: &GameRequestPairing) {
        let board_size = pairing.board_size.to_string();
        self.match_metrics
            .pairings_created_total
            .with_label_values(&[board_size.as_str()])
            .inc();
    }

    pub fn record_pairing_rejected(&self) {
        self.match_metrics.pairings_rejected_total.inc();
    }

    /// Record one inbound envelope by type and dispatch outcome
    pub fn record_message(&self, kind: &str, outcome: &str, duration: Duration) {
        self.service_metrics
            .messages_total
            .with_label_values(&[kind, outcome])
            .inc();

        self.performance_metrics
            .message_processing_duration
            .with_label_values(&[kind])
            .observe(duration.as_secs_f64());
    }

    /// Record one outbound event publish
    pub fn record_publish(&self, event: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .events_published_total
            .with_label_values(&[event, status])
            .inc();

        self.performance_metrics
            .publish_duration
            .with_label_values(&[event, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new(
            "goban_matchmaker_uptime_seconds",
            "Service uptime in seconds",
        )?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let messages_total = IntCounterVec::new(
            Opts::new(
                "goban_matchmaker_messages_total",
                "Inbound messages by type and outcome",
            ),
            &["type", "outcome"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "goban_matchmaker_events_published_total",
                "Outbound events by type and status",
            ),
            &["event", "status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        let health_status = IntGauge::new(
            "goban_matchmaker_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new(
                "goban_matchmaker_component_health",
                "Component health status",
            ),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            messages_total,
            events_published_total,
            health_status,
            component_health,
        })
    }
}

impl RequestMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let requests_submitted_total = IntCounter::new(
            "goban_matchmaker_requests_submitted_total",
            "Game requests accepted into the queue",
        )?;
        registry.register(Box::new(requests_submitted_total.clone()))?;

        let requests_invalid_total = IntCounter::new(
            "goban_matchmaker_requests_invalid_total",
            "Game requests rejected by validation",
        )?;
        registry.register(Box::new(requests_invalid_total.clone()))?;

        let requests_pending = IntGauge::new(
            "goban_matchmaker_requests_pending",
            "Game requests waiting for a partner",
        )?;
        registry.register(Box::new(requests_pending.clone()))?;

        let match_attempts_total = IntCounterVec::new(
            Opts::new(
                "goban_matchmaker_match_attempts_total",
                "Match attempts by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(match_attempts_total.clone()))?;

        Ok(Self {
            requests_submitted_total,
            requests_invalid_total,
            requests_pending,
            match_attempts_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pairings_created_total = IntCounterVec::new(
            Opts::new(
                "goban_matchmaker_pairings_created_total",
                "Pairings proposed",
            ),
            &["board_size"],
        )?;
        registry.register(Box::new(pairings_created_total.clone()))?;

        let pairings_rejected_total = IntCounter::new(
            "goban_matchmaker_pairings_rejected_total",
            "Pairings turned down by a player",
        )?;
        registry.register(Box::new(pairings_rejected_total.clone()))?;

        let pairings_active = IntGauge::new(
            "goban_matchmaker_pairings_active",
            "Pairings awaiting confirmation",
        )?;
        registry.register(Box::new(pairings_active.clone()))?;

        let incompatibilities_total = IntCounterVec::new(
            Opts::new(
                "goban_matchmaker_incompatibilities_total",
                "Candidates passed over, by conflicting field",
            ),
            &["field"],
        )?;
        registry.register(Box::new(incompatibilities_total.clone()))?;

        let claim_conflicts_total = IntCounter::new(
            "goban_matchmaker_claim_conflicts_total",
            "Pairing commits lost to a concurrent writer",
        )?;
        registry.register(Box::new(claim_conflicts_total.clone()))?;

        let candidates_scanned = Histogram::with_opts(
            HistogramOpts::new(
                "goban_matchmaker_candidates_scanned",
                "Candidates evaluated per match attempt",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 500.0]),
        )?;
        registry.register(Box::new(candidates_scanned.clone()))?;

        Ok(Self {
            pairings_created_total,
            pairings_rejected_total,
            pairings_active,
            incompatibilities_total,
            claim_conflicts_total,
            candidates_scanned,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let match_duration = Histogram::with_opts(
            HistogramOpts::new(
                "goban_matchmaker_match_duration_seconds",
                "Match attempt duration",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        registry.register(Box::new(match_duration.clone()))?;

        let message_processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "goban_matchmaker_message_processing_duration_seconds",
                "Inbound message processing time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["type"],
        )?;
        registry.register(Box::new(message_processing_duration.clone()))?;

        let publish_duration = HistogramVec::new(
            HistogramOpts::new(
                "goban_matchmaker_publish_duration_seconds",
                "Event publish duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event", "status"],
        )?;
        registry.register(Box::new(publish_duration.clone()))?;

        Ok(Self {
            match_duration,
            message_processing_duration,
            publish_duration,
        })
    }
}
