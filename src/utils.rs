//! Utility functions for the matchmaking service

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique game request ID
pub fn generate_request_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique pairing ID
pub fn generate_pairing_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Komi is counted in half points
pub fn is_half_point_multiple(komi: f64) -> bool {
    komi.is_finite() && (komi * 2.0).fract() == 0.0
}
