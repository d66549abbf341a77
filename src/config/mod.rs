//! Configuration management for the goban-matchmaker service
//!
//! Loading from environment variables and TOML files, validation, and
//! default values.

pub mod app;

pub use app::{validate_config, AmqpSettings, AppConfig, MatchmakingSettings, ServiceSettings};
