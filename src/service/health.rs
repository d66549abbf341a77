//! Health checks for the matchmaking service
//!
//! Readiness and liveness probes plus a detailed report that combines
//! component checks with pairing statistics.

use crate::service::app::ServiceContext;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Value exported on the health status gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    /// The worse of two statuses
    fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.as_gauge() < self.as_gauge() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Requests waiting unpaired
    pub requests_pending: usize,
    /// Pairings awaiting confirmation
    pub pairings_active: usize,
    /// Pairings proposed since service start
    pub pairings_created: u64,
    /// Pairings turned down since service start
    pub pairings_rejected: u64,
    pub uptime_info: String,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: Arc<ServiceContext>) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(&context).await,
            Self::check_pairing_manager(&context).await,
            Self::check_amqp_connection(&context),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |status, check| status.worst(check.status));

        let stats = Self::gather_service_stats(&context).await;

        Ok(HealthCheck {
            status,
            service: context.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: Arc<ServiceContext>) -> Result<HealthStatus> {
        if context.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(context: Arc<ServiceContext>) -> Result<HealthStatus> {
        if !context.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let status = Self::check_pairing_manager(&context)
            .await
            .status
            .worst(Self::check_amqp_connection(&context).status);
        Ok(status)
    }

    async fn check_service_running(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if context.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The manager is healthy when it can read the store
    async fn check_pairing_manager(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match context.manager().get_stats().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Pairing manager stats check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Stats check failed: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "pairing_manager".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Running without a broker is degraded rather than down
    fn check_amqp_connection(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match context.amqp_connection() {
            Some(connection) if connection.is_open() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("Running without AMQP".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(context: &ServiceContext) -> ServiceStats {
        let uptime_info = format!("Up {}s", context.uptime().as_secs());

        match context.manager().get_stats().await {
            Ok(stats) => ServiceStats {
                requests_pending: stats.requests_pending,
                pairings_active: stats.pairings_active,
                pairings_created: stats.pairings_created,
                pairings_rejected: stats.pairings_rejected,
                uptime_info,
            },
            Err(e) => {
                debug!("Failed to get pairing stats for health check: {}", e);
                ServiceStats {
                    uptime_info,
                    ..ServiceStats::default()
                }
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::service::app::AppState;

    #[test]
    fn test_worst_status() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Unhealthy.worst(HealthStatus::Degraded),
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthStatus::Healthy.as_gauge(), 2);
    }

    #[tokio::test]
    async fn test_stopped_service_is_unhealthy() {
        let state = AppState::offline(AppConfig::default()).unwrap();
        let context = state.context();

        let health = HealthCheck::check(context.clone()).await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.service, "goban-matchmaker");
        assert_eq!(health.checks.len(), 3);
        assert_eq!(health.stats.requests_pending, 0);

        assert_eq!(
            HealthCheck::liveness_check(context.clone()).await.unwrap(),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheck::readiness_check(context).await.unwrap(),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_health_report_serializes() {
        let state = AppState::offline(AppConfig::default()).unwrap();
        let health = HealthCheck::check(state.context()).await.unwrap();

        let json = health.to_json().unwrap();
        assert!(json.contains("\"pairing_manager\""));
        assert!(json.contains("\"amqp_connection\""));
    }
}
