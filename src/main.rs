//! Main entry point for the goban-matchmaker service
//!
//! Loads configuration, initializes logging, runs the service until a
//! shutdown signal arrives and then shuts it down within the configured
//! timeout.

use anyhow::Result;
use clap::Parser;
use goban_matchmaker::config::{validate_config, AppConfig};
use goban_matchmaker::service::{AppState, HealthCheck, HealthStatus, ServiceContext};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Goban Matchmaker - automatic pairing of Go game requests
#[derive(Parser)]
#[command(
    name = "goban-matchmaker",
    version,
    about = "Matchmaking microservice that pairs Go game requests",
    long_about = "Goban Matchmaker consumes game requests over AMQP, pairs each request with \
                 the oldest compatible one in the queue, resolves board size, handicap, komi, \
                 rules and colors, and publishes the proposed pairings."
)]
struct Args {
    /// Path to a TOML configuration file; environment variables still apply on top
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Connect, report component health and exit with its status
    #[arg(long)]
    health_check: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// AMQP broker URL
    #[arg(long, value_name = "URL")]
    amqp_url: Option<String>,

    /// Port for the health and metrics endpoints
    #[arg(long, value_name = "PORT")]
    health_port: Option<u16>,

    /// Seed for the stone color coin flip
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration, assemble the service offline and exit
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(log_level) = &self.log_level {
            config.service.log_level = log_level.clone();
        }
        if self.debug {
            config.service.log_level = "debug".to_string();
        }
        if let Some(amqp_url) = &self.amqp_url {
            config.amqp.url = amqp_url.clone();
        }
        if let Some(health_port) = self.health_port {
            config.service.health_port = health_port;
        }
        if let Some(seed) = self.seed {
            config.matchmaking.rng_seed = Some(seed);
        }
    }
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Connect to the broker, run one health check and exit with its status
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let mut app_state = AppState::new(config).await?;
    let health = HealthCheck::check(app_state.context()).await;

    if let Err(e) = app_state.shutdown().await {
        warn!("Failed to release health check resources: {}", e);
    }

    match health {
        Ok(health) => {
            for check in &health.checks {
                println!(
                    "  {}: {}{}",
                    check.name,
                    check.status,
                    check
                        .message
                        .as_ref()
                        .map(|m| format!(" ({})", m))
                        .unwrap_or_default()
                );
            }
            println!("  Pending requests: {}", health.stats.requests_pending);
            println!("  Active pairings: {}", health.stats.pairings_active);

            // The probe never starts consuming, so only the other components count
            let healthy = health
                .checks
                .iter()
                .filter(|check| check.name != "service_running")
                .all(|check| check.status == HealthStatus::Healthy);

            if healthy {
                println!("Health Check: {}", HealthStatus::Healthy);
                std::process::exit(0);
            } else {
                println!("Health Check: {}", HealthStatus::Unhealthy);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Log a health summary periodically
async fn health_check_task(context: Arc<ServiceContext>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while context.is_running().await {
        interval.tick().await;

        match HealthCheck::check(context.clone()).await {
            Ok(health) => {
                info!(
                    "Health check: {} - {} pending requests, {} active pairings",
                    health.status, health.stats.requests_pending, health.stats.pairings_active
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("Goban Matchmaker");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   AMQP: {}", config.amqp.url);
    info!("   Request queue: {}", config.amqp.request_queue);
    info!("   Events exchange: {}", config.amqp.events_exchange);
    info!(
        "   Max claim retries: {}",
        config.matchmaking.max_claim_retries
    );
    info!(
        "   Rematch after rejection: {}",
        config.matchmaking.rematch_after_rejection
    );
    info!("   Registered users: {}", config.matchmaking.users.len());
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };

    args.apply_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        display_startup_banner(&config);
        if let Err(e) = AppState::offline(config) {
            error!("Service assembly failed: {}", e);
            std::process::exit(1);
        }
        info!("Configuration validation successful");
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let health_task = tokio::spawn(health_check_task(app_state.context()));

    info!("Goban Matchmaker is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("Graceful shutdown completed successfully"),
        Ok(Err(e)) => error!("Shutdown finished with an error: {}", e),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    info!("Goban Matchmaker stopped");
    Ok(())
}
