//! Main application state and service coordination
//!
//! [`AppState`] wires the request store, pairing manager, AMQP transport,
//! health server and background tasks together. The parts that health
//! checks need are shared through [`ServiceContext`].

use crate::amqp::connection::AmqpConnection;
use crate::amqp::handlers::{MessageHandler, RequestConsumer};
use crate::amqp::publisher::{
    AmqpEventPublisher, EventPublisher, LoggingEventPublisher, PublisherConfig,
};
use crate::config::AppConfig;
use crate::error::Result as MatchmakingResult;
use crate::matching::{MatchMaker, PairingManager};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::service::health::{HealthCheck, HealthStatus};
use crate::store::{InMemoryRequestStore, RequestStore};
use crate::types::{MatchRequest, RejectPairing, SubmitGameRequest};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

const STATS_REFRESH_INTERVAL: Duration = Duration::from_secs(15);
const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Message handler that forwards decoded envelopes to the pairing manager
struct ProductionMessageHandler {
    manager: Arc<PairingManager>,
}

#[async_trait]
impl MessageHandler for ProductionMessageHandler {
    async fn handle_submit_request(&self, request: SubmitGameRequest) -> MatchmakingResult<()> {
        let user_id = request.user_id;
        let outcome = self.manager.submit_request(request).await?;

        debug!(
            "Request {} from user {} queued, paired: {}",
            outcome.request_id,
            user_id,
            outcome.outcome.is_paired()
        );
        Ok(())
    }

    async fn handle_match_request(&self, request: MatchRequest) -> MatchmakingResult<()> {
        let outcome = self.manager.match_request(request.request_id).await?;
        debug!(
            "Re-match of request {} paired: {}",
            request.request_id,
            outcome.is_paired()
        );
        Ok(())
    }

    async fn handle_reject_pairing(&self, request: RejectPairing) -> MatchmakingResult<()> {
        let outcome = self.manager.reject_pairing(request.pairing_id).await?;
        debug!(
            "Pairing {} rejected (new: {}), {} rematches",
            request.pairing_id,
            outcome.newly_rejected,
            outcome.rematches.len()
        );
        Ok(())
    }

    async fn handle_error(&self, error: &anyhow::Error, message_data: &[u8]) {
        error!(
            "Message processing error: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            error!("Message preview: {:?}", preview);
        }
    }
}

/// State shared between the running service, its health checks and the
/// background tasks
pub struct ServiceContext {
    config: AppConfig,
    manager: Arc<PairingManager>,
    store: Arc<InMemoryRequestStore>,
    amqp_connection: Option<Arc<AmqpConnection>>,
    is_running: RwLock<bool>,
    started_at: Instant,
}

impl ServiceContext {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn manager(&self) -> Arc<PairingManager> {
        self.manager.clone()
    }

    pub fn store(&self) -> Arc<InMemoryRequestStore> {
        self.store.clone()
    }

    /// `None` when the service runs without a broker
    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    async fn set_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

/// Main application state containing all service components
pub struct AppState {
    context: Arc<ServiceContext>,

    /// Metrics collector and health endpoints
    metrics_service: Arc<MetricsService>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// AMQP consumer for the inbound request queue
    consumer: Option<RequestConsumer>,
}

impl AppState {
    /// Initialize the service against the configured AMQP broker
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing goban-matchmaker service");
        info!(
            "Configuration: service={}, amqp_url={}",
            config.service.name, config.amqp.url
        );

        let amqp_connection = Self::initialize_amqp(&config).await?;
        let publisher = Self::initialize_publisher(&config, &amqp_connection).await?;

        Self::assemble(config, publisher, Some(amqp_connection))
    }

    /// Initialize the service without a broker; events are only logged
    pub fn offline(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing goban-matchmaker service without AMQP");
        Self::assemble(config, Arc::new(LoggingEventPublisher), None)
    }

    fn assemble(
        config: AppConfig,
        publisher: Arc<dyn EventPublisher>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Result<Self, ServiceError> {
        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let store = Arc::new(InMemoryRequestStore::new());
        for user in &config.matchmaking.users {
            store
                .register_user(user.clone())
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to register user {}: {}", user.id, e),
                })?;
        }
        info!("Registered {} users", config.matchmaking.users.len());

        let store_handle: Arc<dyn RequestStore> = store.clone();
        let maker = Arc::new(MatchMaker::new(store_handle, config.matching_config()));
        let manager = Arc::new(PairingManager::with_maker_and_metrics(
            maker,
            publisher,
            metrics_collector.clone(),
            config.matchmaking.rematch_after_rejection,
        ));

        let context = Arc::new(ServiceContext {
            config,
            manager,
            store,
            amqp_connection,
            is_running: RwLock::new(false),
            started_at: Instant::now(),
        });

        let health_config = HealthServerConfig {
            port: context.config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone())
                .with_context(context.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(metrics_collector, health_server));

        Ok(Self {
            context,
            metrics_service,
            background_tasks: Vec::new(),
            consumer: None,
        })
    }

    /// Start the health server, message consumption and background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting goban-matchmaker service");

        self.context.set_running(true).await;

        self.start_metrics_service().await;
        self.start_amqp_consumption().await?;
        self.start_background_tasks();

        info!("goban-matchmaker service started");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of goban-matchmaker service");

        self.context.set_running(false).await;

        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("AMQP message consumption stopped");
            }
        }

        self.stop_background_tasks().await;

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        if let Some(connection) = self.context.amqp_connection() {
            if let Err(e) = connection.close().await {
                warn!("Failed to close AMQP connection: {}", e);
            }
        }

        let final_stats = self.context.manager.get_stats().await.map_err(|e| {
            ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            }
        })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("goban-matchmaker service shutdown completed");
        Ok(())
    }

    pub fn context(&self) -> Arc<ServiceContext> {
        self.context.clone()
    }

    pub fn config(&self) -> &AppConfig {
        self.context.config()
    }

    pub fn manager(&self) -> Arc<PairingManager> {
        self.context.manager()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.context.is_running().await
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let connection =
            AmqpConnection::new(&config.amqp)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn initialize_publisher(
        config: &AppConfig,
        connection: &AmqpConnection,
    ) -> Result<Arc<dyn EventPublisher>, ServiceError> {
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open publisher channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.events_exchange.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
        };

        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare events exchange: {}", e),
            })?;

        Ok(Arc::new(publisher))
    }

    async fn start_metrics_service(&mut self) {
        let metrics_service = self.metrics_service.clone();
        let port = self.context.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the listener a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("Health and metrics endpoints started on port {}", port);
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = self.context.amqp_connection() else {
            info!("No AMQP connection; inbound messages will not be consumed");
            return Ok(());
        };

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let handler = Arc::new(ProductionMessageHandler {
            manager: self.context.manager(),
        });
        let consumer = RequestConsumer::new(handler, channel)
            .with_metrics(self.metrics_service.collector());

        let queue = &self.context.config.amqp.request_queue;
        consumer
            .start_consuming(queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming from {}: {}", queue, e),
            })?;

        self.consumer = Some(consumer);
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        let stats_task = {
            let context = self.context.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(STATS_REFRESH_INTERVAL);
                info!("Stats refresh task started");

                while context.is_running().await {
                    interval.tick().await;

                    // get_stats pushes the gauges into the collector
                    match context.manager.get_stats().await {
                        Ok(stats) => debug!(
                            "Refreshed stats - pending: {}, active pairings: {}",
                            stats.requests_pending, stats.pairings_active
                        ),
                        Err(e) => warn!("Failed to refresh pairing stats: {}", e),
                    }
                }

                info!("Stats refresh task stopped");
            })
        };

        let health_task = {
            let context = self.context.clone();
            let metrics_collector = self.metrics_service.collector();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
                info!("Health metrics task started");

                while context.is_running().await {
                    interval.tick().await;

                    metrics_collector.update_uptime(context.uptime());

                    match HealthCheck::check(context.clone()).await {
                        Ok(health) => {
                            metrics_collector.update_health_status(health.status.as_gauge());
                            for check in &health.checks {
                                metrics_collector.update_component_health(
                                    &check.name,
                                    check.status == HealthStatus::Healthy,
                                );
                            }
                        }
                        Err(e) => warn!("Health check failed: {}", e),
                    }
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(stats_task);
        self.background_tasks.push(health_task);
        info!("Background maintenance tasks started");
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("All {} background tasks stopped", task_count);
    }
}
