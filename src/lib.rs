//! Goban Matchmaker - automatic pairing of Go game requests
//!
//! This crate scans a queue of pending game requests, pairs each one with
//! the oldest compatible request from another user, resolves the concrete
//! game terms and records the proposed pairing. An AMQP service shell with
//! metrics and health endpoints wraps the engine.

pub mod amqp;
pub mod config;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use matching::{MatchMaker, MatchOutcome, MatchingConfig, PairingManager};
pub use store::{InMemoryRequestStore, RequestStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
