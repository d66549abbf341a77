//! Pairing manager: the request lifecycle around the match maker
//!
//! Accepts new requests, re-runs matching on demand, applies rejections,
//! publishes pairing events and keeps statistics and metrics.

use crate::amqp::messages::MessageUtils;
use crate::amqp::publisher::EventPublisher;
use crate::error::{MatchmakingError, Result};
use crate::matching::maker::{MatchMaker, MatchOutcome, MatchingConfig};
use crate::metrics::MetricsCollector;
use crate::store::RequestStore;
use crate::types::{
    GameRequest, GameRequestPairing, PairingId, PairingProposed, PairingRejected,
    ProposedPairing, RequestId, SubmitGameRequest,
};
use crate::utils::current_timestamp;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Statistics about pairing manager operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairingManagerStats {
    /// Requests accepted into the queue
    pub requests_submitted: u64,
    /// Submissions rejected by validation
    pub requests_invalid: u64,
    /// Match attempts run, whatever their outcome
    pub match_attempts: u64,
    /// Pairings proposed
    pub pairings_created: u64,
    /// Pairings turned down
    pub pairings_rejected: u64,
    /// Commits lost to a concurrent writer
    pub claim_conflicts: u64,
    /// Outbound events that could not be delivered after their state change
    pub events_failed: u64,
    /// Current number of requests waiting unpaired
    pub requests_pending: usize,
    /// Current number of pairings awaiting confirmation
    pub pairings_active: usize,
}

/// Result of submitting a new request
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub request_id: RequestId,
    pub outcome: MatchOutcome,
}

/// Result of rejecting a pairing
#[derive(Debug, Clone, PartialEq)]
pub struct RejectOutcome {
    pub pairing: GameRequestPairing,
    /// False when the pairing had already been rejected
    pub newly_rejected: bool,
    /// Pairings found for the freed requests afterwards
    pub rematches: Vec<ProposedPairing>,
}

#[derive(Clone)]
pub struct PairingManager {
    maker: Arc<MatchMaker>,
    store: Arc<dyn RequestStore>,
    event_publisher: Arc<dyn EventPublisher>,
    metrics_collector: Arc<MetricsCollector>,
    stats: Arc<RwLock<PairingManagerStats>>,
    rematch_after_rejection: bool,
}

impl PairingManager {
    /// Create a manager with its own match maker and metrics collector
    pub fn new(
        store: Arc<dyn RequestStore>,
        event_publisher: Arc<dyn EventPublisher>,
        matching_config: MatchingConfig,
    ) -> Result<Self> {
        let metrics_collector = Arc::new(MetricsCollector::new()?);
        let maker = Arc::new(MatchMaker::new(store, matching_config));

        Ok(Self::with_maker_and_metrics(
            maker,
            event_publisher,
            metrics_collector,
            true,
        ))
    }

    /// Create a manager around an existing match maker
    pub fn with_maker_and_metrics(
        maker: Arc<MatchMaker>,
        event_publisher: Arc<dyn EventPublisher>,
        metrics_collector: Arc<MetricsCollector>,
        rematch_after_rejection: bool,
    ) -> Self {
        Self {
            store: maker.store(),
            maker,
            event_publisher,
            metrics_collector,
            stats: Arc::new(RwLock::new(PairingManagerStats::default())),
            rematch_after_rejection,
        }
    }

    pub fn maker(&self) -> Arc<MatchMaker> {
        self.maker.clone()
    }

    pub fn store(&self) -> Arc<dyn RequestStore> {
        self.store.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    fn update_stats(&self, update: impl FnOnce(&mut PairingManagerStats)) -> Result<()> {
        let mut stats = self
            .stats
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;
        update(&mut stats);
        Ok(())
    }

    /// Validate and queue a new request, then try to pair it straight away
    pub async fn submit_request(&self, submit: SubmitGameRequest) -> Result<SubmitOutcome> {
        info!(
            "Processing game request - user: {}, board: {:?}, handicap: {:?}, komi: {:?}, color: {:?}",
            submit.user_id,
            submit.board_size.as_option(),
            submit.handicap.as_option(),
            submit.komi.as_option(),
            submit.stone_color.as_option()
        );

        if let Err(e) = MessageUtils::validate_submit_request(&submit) {
            warn!("Rejecting game request from {}: {}", submit.user_id, e);
            self.metrics_collector.record_invalid_request();
            self.update_stats(|stats| stats.requests_invalid += 1)?;
            return Err(e);
        }

        if self.store.find_user_by_id(submit.user_id).await?.is_none() {
            return Err(MatchmakingError::UserNotFound {
                user_id: submit.user_id.to_string(),
            }
            .into());
        }

        let request = submit.into_game_request();
        let request_id = self.store.insert_request(request.clone()).await?;

        self.metrics_collector.record_request_submitted();
        self.update_stats(|stats| stats.requests_submitted += 1)?;
        debug!("Queued game request {} for user {}", request_id, request.user_id);

        let outcome = self.run_match(&request).await?;
        Ok(SubmitOutcome {
            request_id,
            outcome,
        })
    }

    /// Re-run matching for a request that is already queued
    pub async fn match_request(&self, request_id: RequestId) -> Result<MatchOutcome> {
        let request = self.store.get_request(request_id).await?.ok_or_else(|| {
            MatchmakingError::RequestNotFound {
                request_id: request_id.to_string(),
            }
        })?;

        self.run_match(&request).await
    }

    /// Turn down a pairing. Both requests go back to the queue and, unless
    /// disabled, are matched again oldest first.
    pub async fn reject_pairing(&self, pairing_id: PairingId) -> Result<RejectOutcome> {
        let rejected = self.store.reject_pairing(pairing_id).await?;
        let pairing = rejected.pairing;
        if !rejected.newly_rejected {
            debug!("Pairing {} was already rejected", pairing_id);
            return Ok(RejectOutcome {
                pairing,
                newly_rejected: false,
                rematches: Vec::new(),
            });
        }

        info!(
            "Pairing {} rejected, requests {} and {} back in the queue",
            pairing.id, pairing.black_request_id, pairing.white_request_id
        );
        self.metrics_collector.record_pairing_rejected();
        self.update_stats(|stats| stats.pairings_rejected += 1)?;

        self.publish_rejection(&pairing).await;

        let mut rematches = Vec::new();
        if self.rematch_after_rejection {
            let mut freed = Vec::new();
            for request_id in [pairing.black_request_id, pairing.white_request_id] {
                if let Some(request) = self.store.get_request(request_id).await? {
                    freed.push(request);
                }
            }
            freed.sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id)));

            for request in freed {
                // The first rematch may already have claimed the second request
                let current = match self.store.get_request(request.id).await? {
                    Some(current) if current.is_pending() => current,
                    _ => continue,
                };

                if let MatchOutcome::Paired(proposed) = self.run_match(&current).await? {
                    rematches.push(proposed);
                }
            }
        }

        Ok(RejectOutcome {
            pairing,
            newly_rejected: true,
            rematches,
        })
    }

    async fn run_match(&self, request: &GameRequest) -> Result<MatchOutcome> {
        let start_time = Instant::now();
        let result = self.maker.try_match_with_report(request).await;
        let duration = start_time.elapsed();

        let (outcome, report) = match result {
            Ok(result) => result,
            Err(e) => {
                error!("Match attempt for request {} failed: {}", request.id, e);
                self.metrics_collector.record_match_error(duration);
                self.update_stats(|stats| stats.match_attempts += 1)?;
                return Err(e);
            }
        };

        let label = if outcome.is_paired() { "paired" } else { "no_match" };
        self.metrics_collector
            .record_match_attempt(label, &report, duration);
        self.update_stats(|stats| {
            stats.match_attempts += 1;
            stats.claim_conflicts += report.claim_conflicts as u64;
            if outcome.is_paired() {
                stats.pairings_created += 1;
            }
        })?;

        debug!(
            "Match attempt for {} finished in {:.2}ms: {} ({} candidates evaluated)",
            request.id,
            duration.as_secs_f64() * 1000.0,
            label,
            report.candidates_evaluated
        );

        if let MatchOutcome::Paired(proposed) = &outcome {
            self.metrics_collector
                .record_pairing_created(&proposed.pairing);
            self.publish_proposal(proposed).await;
        }

        Ok(outcome)
    }

    /// The pairing is already committed; a failed publish is reported, not returned
    async fn publish_proposal(&self, proposed: &ProposedPairing) {
        let start_time = Instant::now();
        let result = self
            .event_publisher
            .publish_pairing_proposed(PairingProposed::from(proposed.clone()))
            .await;

        self.metrics_collector
            .record_publish("pairing_proposed", result.is_ok(), start_time.elapsed());
        if let Err(e) = result {
            self.report_publish_failure("pairing_proposed", proposed.pairing.id, &e);
        }
    }

    async fn publish_rejection(&self, pairing: &GameRequestPairing) {
        let event = PairingRejected {
            pairing_id: pairing.id,
            black_request_id: pairing.black_request_id,
            white_request_id: pairing.white_request_id,
            timestamp: current_timestamp(),
        };

        let start_time = Instant::now();
        let result = self.event_publisher.publish_pairing_rejected(event).await;

        self.metrics_collector
            .record_publish("pairing_rejected", result.is_ok(), start_time.elapsed());
        if let Err(e) = result {
            self.report_publish_failure("pairing_rejected", pairing.id, &e);
        }
    }

    fn report_publish_failure(&self, kind: &str, pairing_id: PairingId, e: &anyhow::Error) {
        error!(
            "Failed to publish {} for pairing {}; the store change stands: {}",
            kind, pairing_id, e
        );
        if let Err(stats_err) = self.update_stats(|stats| stats.events_failed += 1) {
            warn!("Could not count failed publish: {}", stats_err);
        }
    }

    /// Current counters plus a fresh snapshot of queue and pairing sizes
    pub async fn get_stats(&self) -> Result<PairingManagerStats> {
        let requests_pending = self.store.list_pending_requests().await?.len();
        let pairings_active = self
            .store
            .list_pairings()
            .await?
            .iter()
            .filter(|pairing| pairing.is_active())
            .count();

        self.update_stats(|stats| {
            stats.requests_pending = requests_pending;
            stats.pairings_active = pairings_active;
        })?;

        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?
            .clone();

        self.metrics_collector.update_from_stats(&stats);
        Ok(stats)
    }
}
