//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    #[error("Invalid game request: {reason}")]
    InvalidGameRequest { reason: String },

    #[error("User not found: {user_id}")]
    UserNotFound { user_id: String },

    #[error("Game request not found: {request_id}")]
    RequestNotFound { request_id: String },

    #[error("Pairing not found: {pairing_id}")]
    PairingNotFound { pairing_id: String },

    /// A conditional claim found the request no longer pending
    #[error("Game request already claimed: {request_id}")]
    RequestAlreadyClaimed { request_id: String },

    #[error("Persistence write failed: {message}")]
    PersistenceWriteFailure { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Look through an `anyhow::Error` for a matchmaking error kind
    pub fn from_anyhow(error: &anyhow::Error) -> Option<&MatchmakingError> {
        error.downcast_ref::<MatchmakingError>()
    }

    /// Lost claims are retried, everything else aborts the attempt.
    /// A request that vanished between scan and commit counts as lost.
    pub fn is_claim_conflict(error: &anyhow::Error) -> bool {
        matches!(
            Self::from_anyhow(error),
            Some(MatchmakingError::RequestAlreadyClaimed { .. })
                | Some(MatchmakingError::RequestNotFound { .. })
        )
    }
}
