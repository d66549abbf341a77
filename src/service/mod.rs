//! Service layer for the goban-matchmaker service
//!
//! Application state, service coordination and health checks.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceContext, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceStats};
