//! AMQP connection management with retry logic

use crate::config::AmqpSettings;
use crate::error::{MatchmakingError, Result};
use amqprs::channel::Channel;
use amqprs::connection::{Connection, OpenConnectionArguments};
use anyhow::Context;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

/// Wrapper around an AMQP connection opened from [`AmqpSettings`]
pub struct AmqpConnection {
    connection: Connection,
}

impl AmqpConnection {
    /// Connect with exponential backoff retry
    pub async fn new(settings: &AmqpSettings) -> Result<Self> {
        let connection = Self::connect_with_retry(settings).await?;
        Ok(Self { connection })
    }

    async fn connect_with_retry(settings: &AmqpSettings) -> Result<Connection> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(settings.retry_delay_ms);

        loop {
            match Self::try_connect(settings).await {
                Ok(connection) => {
                    info!("Successfully connected to AMQP broker");
                    return Ok(connection);
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > settings.max_retry_attempts {
                        error!(
                            "Failed to connect to AMQP after {} retries",
                            settings.max_retry_attempts
                        );
                        return Err(MatchmakingError::AmqpConnectionFailed {
                            message: format!("Max retries exceeded: {}", e),
                        }
                        .into());
                    }

                    warn!(
                        "AMQP connection attempt {} failed: {}. Retrying in {:?}",
                        retry_count, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(30000));
                }
            }
        }
    }

    async fn try_connect(settings: &AmqpSettings) -> Result<Connection> {
        let args = OpenConnectionArguments::try_from(settings.url.as_str()).map_err(|e| {
            MatchmakingError::ConfigurationError {
                message: format!("Invalid AMQP URL: {}", e),
            }
        })?;

        let limit = Duration::from_secs(settings.connection_timeout_seconds);
        let connection = timeout(limit, Connection::open(&args))
            .await
            .map_err(|_| MatchmakingError::AmqpConnectionFailed {
                message: format!("Connection timed out after {:?}", limit),
            })?
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: e.to_string(),
            })?;

        Ok(connection)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub async fn open_channel(&self) -> Result<Channel> {
        self.connection.open_channel(None).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to open channel: {}", e),
            }
            .into()
        })
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    pub async fn close(&self) -> Result<()> {
        self.connection
            .clone()
            .close()
            .await
            .context("Failed to close AMQP connection")
    }
}
