//! AMQP event publisher for outbound events

use crate::amqp::messages::OutboundEvent;
use crate::error::{MatchmakingError, Result};
use crate::types::{PairingProposed, PairingRejected};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing matchmaking events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_pairing_proposed(&self, event: PairingProposed) -> Result<()>;

    async fn publish_pairing_rejected(&self, event: PairingRejected) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: "goban.matchmaking.events".to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic");
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare events exchange {}: {}",
                    self.config.exchange, e
                ),
            }
        })?;

        info!("Declared events exchange {}", self.config.exchange);
        Ok(())
    }

    /// Publish with exponential backoff, giving up after `max_retries`
    async fn publish_with_retry(&self, event: &OutboundEvent) -> Result<()> {
        let payload = event.to_envelope()?.to_bytes()?;
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(event.routing_key(), &payload).await {
                Ok(_) => {
                    debug!(
                        "Published {} to {} ({})",
                        event.kind(),
                        self.config.exchange,
                        event.routing_key()
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish {} after {} retries: {}",
                            event.kind(),
                            self.config.max_retries,
                            e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for {}: {}. Retrying in {:?}",
                        retry_count,
                        event.kind(),
                        e,
                        delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_publish(&self, routing_key: &str, payload: &[u8]) -> Result<()> {
        let args = BasicPublishArguments::new(&self.config.exchange, routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&uuid::Uuid::new_v4().to_string())
            .with_timestamp(chrono::Utc::now().timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload.to_vec(), args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_pairing_proposed(&self, event: PairingProposed) -> Result<()> {
        self.publish_with_retry(&OutboundEvent::PairingProposed(event))
            .await
    }

    async fn publish_pairing_rejected(&self, event: PairingRejected) -> Result<()> {
        self.publish_with_retry(&OutboundEvent::PairingRejected(event))
            .await
    }
}

/// Publisher that only logs, for `--dry-run`
#[derive(Debug, Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish_pairing_proposed(&self, event: PairingProposed) -> Result<()> {
        info!(
            "[dry-run] pairing_proposed {}: {} (black) vs {} (white)",
            event.pairing.id, event.black_player.display_name, event.white_player.display_name
        );
        Ok(())
    }

    async fn publish_pairing_rejected(&self, event: PairingRejected) -> Result<()> {
        info!("[dry-run] pairing_rejected {}", event.pairing_id);
        Ok(())
    }
}

/// Recording event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<OutboundEvent>>,
    unavailable: AtomicBool,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every publish fails and nothing is recorded
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All events published so far, oldest first
    pub fn get_published_events(&self) -> Vec<OutboundEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Published proposals only
    pub fn proposals(&self) -> Vec<PairingProposed> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                OutboundEvent::PairingProposed(proposed) => Some(proposed),
                OutboundEvent::PairingRejected(_) => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }

    fn record(&self, event: OutboundEvent) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MatchmakingError::AmqpConnectionFailed {
                message: format!("Broker unavailable, dropped {}", event.kind()),
            }
            .into());
        }

        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_pairing_proposed(&self, event: PairingProposed) -> Result<()> {
        self.record(OutboundEvent::PairingProposed(event))
    }

    async fn publish_pairing_rejected(&self, event: PairingRejected) -> Result<()> {
        self.record(OutboundEvent::PairingRejected(event))
    }
}
