//! AMQP integration for the matchmaking service
//!
//! Connection handling, the JSON message envelope, inbound dispatch and
//! outbound event publishing.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

pub use connection::AmqpConnection;
pub use handlers::{dispatch_message, Dispatch, DispatchOutcome, MessageHandler, RequestConsumer};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, LoggingEventPublisher, PublisherConfig};
