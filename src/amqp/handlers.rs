//! AMQP message handling for inbound envelopes
//!
//! [`dispatch_message`] turns raw bytes into a call on a [`MessageHandler`].
//! Bad input never reaches the handler: it is dropped or ignored with a
//! diagnostic and leaves all state untouched.

use crate::amqp::messages::{Envelope, InboundMessage};
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::types::{MatchRequest, RejectPairing, SubmitGameRequest};
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel,
        QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling decoded messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_submit_request(&self, request: SubmitGameRequest) -> Result<()>;

    async fn handle_match_request(&self, request: MatchRequest) -> Result<()>;

    async fn handle_reject_pairing(&self, request: RejectPairing) -> Result<()>;

    /// Called when a handler method fails with a fatal error
    async fn handle_error(&self, error: &anyhow::Error, message_data: &[u8]);
}

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Decoded and processed by the handler
    Handled,
    /// Well-formed envelope of a type this service does not handle
    Ignored,
    /// Malformed envelope or payload, or a reference to something that no
    /// longer exists
    Dropped,
    /// The handler hit a fatal error
    Failed,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Handled => "handled",
            DispatchOutcome::Ignored => "ignored",
            DispatchOutcome::Dropped => "dropped",
            DispatchOutcome::Failed => "failed",
        }
    }
}

/// Envelope type (or `invalid` when none could be read) and outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub kind: String,
    pub outcome: DispatchOutcome,
}

/// Errors that describe bad input rather than a broken service
fn is_droppable(error: &anyhow::Error) -> bool {
    matches!(
        MatchmakingError::from_anyhow(error),
        Some(
            MatchmakingError::InvalidMessage { .. }
                | MatchmakingError::InvalidGameRequest { .. }
                | MatchmakingError::RequestNotFound { .. }
                | MatchmakingError::PairingNotFound { .. }
        )
    )
}

/// Parse one raw message and route it to the handler
pub async fn dispatch_message(handler: &dyn MessageHandler, content: &[u8]) -> Dispatch {
    let envelope = match Envelope::from_bytes(content) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Dropping malformed message ({} bytes): {}", content.len(), e);
            return Dispatch {
                kind: "invalid".to_string(),
                outcome: DispatchOutcome::Dropped,
            };
        }
    };

    let kind = envelope.kind.clone();
    let message = match envelope.decode() {
        Ok(Some(message)) => message,
        Ok(None) => {
            info!("Ignoring message of unrecognized type '{}'", kind);
            return Dispatch {
                kind,
                outcome: DispatchOutcome::Ignored,
            };
        }
        Err(e) => {
            warn!("Dropping '{}' message: {}", kind, e);
            return Dispatch {
                kind,
                outcome: DispatchOutcome::Dropped,
            };
        }
    };

    debug!("Dispatching '{}' message", message.kind());

    let result = match message {
        InboundMessage::SubmitGameRequest(request) => {
            handler.handle_submit_request(request).await
        }
        InboundMessage::MatchRequest(request) => handler.handle_match_request(request).await,
        InboundMessage::RejectPairing(request) => handler.handle_reject_pairing(request).await,
    };

    let outcome = match result {
        Ok(()) => DispatchOutcome::Handled,
        Err(e) if is_droppable(&e) => {
            warn!("Dropping '{}' message: {}", kind, e);
            DispatchOutcome::Dropped
        }
        Err(e) => {
            error!("Processing '{}' message failed: {}", kind, e);
            handler.handle_error(&e, content).await;
            DispatchOutcome::Failed
        }
    };

    Dispatch { kind, outcome }
}

/// Consumer for the inbound requests queue
pub struct RequestConsumer {
    handler: Arc<dyn MessageHandler>,
    metrics: Option<Arc<MetricsCollector>>,
    channel: Channel,
    consumer_tag: String,
}

impl RequestConsumer {
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("goban-matchmaker-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            metrics: None,
            channel,
            consumer_tag,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Declare the queue and start consuming messages from it
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        self.channel
            .queue_declare(
                QueueDeclareArguments::new(queue_name)
                    .durable(true)
                    .auto_delete(false)
                    .finish(),
            )
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;

        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);
        let consumer = QueueConsumer {
            handler: self.handler.clone(),
            metrics: self.metrics.clone(),
        };

        self.channel
            .basic_consume(consumer, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming messages from queue: {}", queue_name);
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming messages");
        Ok(())
    }
}

struct QueueConsumer {
    handler: Arc<dyn MessageHandler>,
    metrics: Option<Arc<MetricsCollector>>,
}

#[async_trait]
impl AsyncConsumer for QueueConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP message received - delivery_tag: {}, size: {} bytes",
            delivery_tag,
            content.len()
        );

        let start_time = Instant::now();
        let dispatch = dispatch_message(self.handler.as_ref(), &content).await;
        let processing_time = start_time.elapsed();

        info!(
            "Message {} '{}' {} in {:.2}ms",
            delivery_tag,
            dispatch.kind,
            dispatch.outcome.as_str(),
            processing_time.as_secs_f64() * 1000.0
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_message(&dispatch.kind, dispatch.outcome.as_str(), processing_time);
        }

        // Failed messages are acknowledged too; the store was left untouched
        // and the sender can resubmit.
        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            error!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}
