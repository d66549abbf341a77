//! The match maker: first-come, first-served pairing of game requests
//!
//! A call to [`MatchMaker::try_match`] walks the outstanding requests oldest
//! first and pairs the given request with the first candidate that is
//! eligible and compatible on every term. There is no best-match search.

use crate::error::{MatchmakingError, Result};
use crate::matching::resolver::{resolve_terms, ResolvedTerms, TermField};
use crate::store::RequestStore;
use crate::types::{
    GameRequest, GameRequestPairing, ProposedPairing, RequestId, StoneColor, User, UserId,
};
use crate::utils::{current_timestamp, generate_pairing_id};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Configuration for match maker behavior
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// How many times a scan restarts after losing a claim race
    pub max_claim_retries: u32,
    /// Seed for the stone color coin; entropy when unset
    pub rng_seed: Option<u64>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_claim_retries: 3,
            rng_seed: None,
        }
    }
}

/// Result of a single `try_match` call
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// A pairing was committed; both requests are now `UnconfirmedPairing`
    Paired(ProposedPairing),
    /// Nothing compatible right now; the request stays queued
    NoMatch,
}

impl MatchOutcome {
    pub fn is_paired(&self) -> bool {
        matches!(self, MatchOutcome::Paired(_))
    }

    pub fn pairing(&self) -> Option<&ProposedPairing> {
        match self {
            MatchOutcome::Paired(proposed) => Some(proposed),
            MatchOutcome::NoMatch => None,
        }
    }
}

/// Per-attempt counters, reported back to the caller for metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    /// Candidates that passed the eligibility filters and were evaluated
    pub candidates_evaluated: usize,
    /// The field each evaluated-but-rejected candidate failed on
    pub incompatibilities: Vec<TermField>,
    /// Commits lost to a concurrent writer
    pub claim_conflicts: u32,
}

/// Why a candidate was passed over before its terms were evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    SameRequest,
    SameUser,
    ActivelyPaired,
    PreviouslyRejected,
}

/// Snapshot-derived exclusion sets for one scan
struct Exclusions {
    active: HashSet<RequestId>,
    rejected_partners: HashSet<RequestId>,
}

impl Exclusions {
    fn build(requester: RequestId, pairings: &[GameRequestPairing]) -> Self {
        let mut active = HashSet::new();
        let mut rejected_partners = HashSet::new();

        for pairing in pairings {
            if pairing.is_active() {
                active.insert(pairing.black_request_id);
                active.insert(pairing.white_request_id);
            } else if let Some(partner) = pairing.partner_of(requester) {
                rejected_partners.insert(partner);
            }
        }

        Self {
            active,
            rejected_partners,
        }
    }

    fn skip_reason(&self, requester: &GameRequest, candidate: &GameRequest) -> Option<Skip> {
        if candidate.id == requester.id {
            Some(Skip::SameRequest)
        } else if candidate.user_id == requester.user_id {
            Some(Skip::SameUser)
        } else if self.active.contains(&candidate.id) {
            Some(Skip::ActivelyPaired)
        } else if self.rejected_partners.contains(&candidate.id) {
            Some(Skip::PreviouslyRejected)
        } else {
            None
        }
    }
}

/// Result of one pass over the queue
enum ScanResult {
    Committed(ProposedPairing),
    Exhausted,
    ClaimLost,
}

/// Pairs game requests against a [`RequestStore`]
pub struct MatchMaker {
    store: Arc<dyn RequestStore>,
    config: MatchingConfig,
    rng: Mutex<Box<dyn RngCore + Send>>,
    /// Serializes match attempts made through this instance
    match_lock: tokio::sync::Mutex<()>,
}

impl MatchMaker {
    /// Create a match maker whose coin is seeded from config, or from entropy
    pub fn new(store: Arc<dyn RequestStore>, config: MatchingConfig) -> Self {
        let rng: Box<dyn RngCore + Send> = match config.rng_seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        };

        Self::with_rng(store, config, rng)
    }

    /// Create a match maker with an explicit random source
    pub fn with_rng(
        store: Arc<dyn RequestStore>,
        config: MatchingConfig,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            store,
            config,
            rng: Mutex::new(rng),
            match_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> Arc<dyn RequestStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Try to pair `request` with the oldest eligible, compatible request
    pub async fn try_match(&self, request: &GameRequest) -> Result<MatchOutcome> {
        self.try_match_with_report(request)
            .await
            .map(|(outcome, _)| outcome)
    }

    /// Same as [`try_match`](Self::try_match), also returning scan counters
    pub async fn try_match_with_report(
        &self,
        request: &GameRequest,
    ) -> Result<(MatchOutcome, ScanReport)> {
        let _guard = self.match_lock.lock().await;
        let mut report = ScanReport::default();

        for attempt in 0..=self.config.max_claim_retries {
            match self.scan_once(request, &mut report).await? {
                ScanResult::Committed(proposed) => {
                    return Ok((MatchOutcome::Paired(proposed), report));
                }
                ScanResult::Exhausted => {
                    debug!("No compatible candidate for request {}", request.id);
                    return Ok((MatchOutcome::NoMatch, report));
                }
                ScanResult::ClaimLost => {
                    report.claim_conflicts += 1;
                    warn!(
                        "Lost claim while pairing request {} (attempt {}), rescanning",
                        request.id,
                        attempt + 1
                    );
                }
            }
        }

        warn!(
            "Giving up on request {} after {} lost claims, leaving it queued",
            request.id, report.claim_conflicts
        );
        Ok((MatchOutcome::NoMatch, report))
    }

    async fn scan_once(
        &self,
        request: &GameRequest,
        report: &mut ScanReport,
    ) -> Result<ScanResult> {
        let queue = self.store.list_pending_requests().await?;
        let pairings = self.store.list_pairings().await?;

        // Work from the stored copy so preferences and state are current
        let requester = match queue.iter().find(|r| r.id == request.id) {
            Some(stored) => stored.clone(),
            None => {
                debug!("Request {} is no longer pending", request.id);
                return Ok(ScanResult::Exhausted);
            }
        };

        let exclusions = Exclusions::build(requester.id, &pairings);
        if exclusions.active.contains(&requester.id) {
            debug!("Request {} is already paired", requester.id);
            return Ok(ScanResult::Exhausted);
        }

        debug!(
            "Scanning {} queued requests for {} ({} excluded as paired, {} as rejected partners)",
            queue.len(),
            requester.id,
            exclusions.active.len(),
            exclusions.rejected_partners.len()
        );

        for candidate in &queue {
            if let Some(reason) = exclusions.skip_reason(&requester, candidate) {
                if reason != Skip::SameRequest {
                    debug!("Skipping candidate {}: {:?}", candidate.id, reason);
                }
                continue;
            }

            report.candidates_evaluated += 1;

            let resolved = {
                let mut rng = self
                    .rng
                    .lock()
                    .map_err(|_| MatchmakingError::InternalError {
                        message: "Failed to acquire random source lock".to_string(),
                    })?;
                resolve_terms(&requester, candidate, rng.as_mut())
            };

            let terms = match resolved {
                Ok(terms) => terms,
                Err(conflict) => {
                    debug!(
                        "Candidate {} incompatible with {} on {}",
                        candidate.id, requester.id, conflict.field
                    );
                    report.incompatibilities.push(conflict.field);
                    continue;
                }
            };

            let proposed = self.build_proposal(&requester, candidate, terms).await?;

            match self.store.commit_pairing(proposed.pairing.clone()).await {
                Ok(_) => {
                    info!(
                        "Paired requests {} (black) and {} (white): {}x{}, handicap {}, komi {}, {} ko, {} scoring",
                        proposed.pairing.black_request_id,
                        proposed.pairing.white_request_id,
                        proposed.pairing.board_size,
                        proposed.pairing.board_size,
                        proposed.pairing.handicap,
                        proposed.pairing.komi,
                        proposed.pairing.ko_rule,
                        proposed.pairing.scoring_system
                    );
                    return Ok(ScanResult::Committed(proposed));
                }
                Err(e) if MatchmakingError::is_claim_conflict(&e) => {
                    return Ok(ScanResult::ClaimLost);
                }
                Err(e) => {
                    return Err(MatchmakingError::PersistenceWriteFailure {
                        message: format!(
                            "Failed to commit pairing of {} and {}: {}",
                            requester.id, candidate.id, e
                        ),
                    }
                    .into());
                }
            }
        }

        Ok(ScanResult::Exhausted)
    }

    /// Assign colors, build the pairing record and resolve both players.
    /// A missing user is a data integrity failure; nothing has been written yet.
    async fn build_proposal(
        &self,
        requester: &GameRequest,
        candidate: &GameRequest,
        terms: ResolvedTerms,
    ) -> Result<ProposedPairing> {
        let (black, white) = match terms.requester_color {
            StoneColor::Black => (requester, candidate),
            StoneColor::White => (candidate, requester),
        };

        let pairing = GameRequestPairing {
            id: generate_pairing_id(),
            create_time: current_timestamp(),
            black_request_id: black.id,
            white_request_id: white.id,
            board_size: terms.board_size,
            handicap: terms.handicap,
            komi: terms.komi,
            ko_rule: terms.ko_rule,
            scoring_system: terms.scoring_system,
            is_rejected: false,
        };

        let black_player = self.require_user(black.user_id).await?;
        let white_player = self.require_user(white.user_id).await?;

        Ok(ProposedPairing {
            pairing,
            black_player,
            white_player,
        })
    }

    async fn require_user(&self, user_id: UserId) -> Result<User> {
        self.store.find_user_by_id(user_id).await?.ok_or_else(|| {
            MatchmakingError::UserNotFound {
                user_id: user_id.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRequestStore;
    use crate::store::RejectedPairing;
    use crate::types::{KoRule, PairingId, Preference, RequestState, ScoringSystem, User};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use mockall::mock;
    use rand::rngs::mock::StepRng;
    use uuid::Uuid;

    mock! {
        pub Store {}

        #[async_trait]
        impl RequestStore for Store {
            async fn list_pending_requests(&self) -> Result<Vec<GameRequest>>;
            async fn list_pairings(&self) -> Result<Vec<GameRequestPairing>>;
            async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<User>>;
            async fn insert_pairing(&self, pairing: GameRequestPairing) -> Result<PairingId>;
            async fn update_request_state(&self, request_id: RequestId, state: RequestState) -> Result<()>;
            async fn claim_request(&self, request_id: RequestId, expected: RequestState, next: RequestState) -> Result<bool>;
            async fn commit_pairing(&self, pairing: GameRequestPairing) -> Result<PairingId>;
            async fn insert_request(&self, request: GameRequest) -> Result<RequestId>;
            async fn get_request(&self, request_id: RequestId) -> Result<Option<GameRequest>>;
            async fn get_pairing(&self, pairing_id: PairingId) -> Result<Option<GameRequestPairing>>;
            async fn reject_pairing(&self, pairing_id: PairingId) -> Result<RejectedPairing>;
        }
    }

    fn heads() -> Box<dyn RngCore + Send> {
        Box::new(StepRng::new(0, 0))
    }

    fn request_for(user_id: UserId, offset_secs: i64) -> GameRequest {
        let mut request = GameRequest::new(user_id);
        request.create_time = Utc::now() + Duration::seconds(offset_secs);
        request
    }

    fn user(id: UserId) -> User {
        User {
            id,
            display_name: format!("player-{}", id),
        }
    }

    async fn seeded_store(requests: &[GameRequest]) -> Arc<InMemoryRequestStore> {
        let store = Arc::new(InMemoryRequestStore::new());
        for request in requests {
            store.register_user(user(request.user_id)).unwrap();
            store.insert_request(request.clone()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_open_requests_pair_with_defaults() {
        let a = request_for(Uuid::new_v4(), 0);
        let b = request_for(Uuid::new_v4(), 1);
        let store = seeded_store(&[a.clone(), b.clone()]).await;
        let maker = MatchMaker::with_rng(store.clone(), MatchingConfig::default(), heads());

        let outcome = maker.try_match(&b).await.unwrap();
        let proposed = outcome.pairing().expect("expected a pairing");

        assert_eq!(proposed.pairing.board_size, 19);
        assert_eq!(proposed.pairing.handicap, 0);
        assert_eq!(proposed.pairing.komi, 7.5);
        assert_eq!(proposed.pairing.ko_rule, KoRule::Simple);
        assert_eq!(proposed.pairing.scoring_system, ScoringSystem::Area);
        // Heads gives the requester black
        assert_eq!(proposed.pairing.black_request_id, b.id);
        assert_eq!(proposed.pairing.white_request_id, a.id);
        assert_eq!(proposed.black_player.id, b.user_id);
        assert_eq!(proposed.white_player.id, a.user_id);

        for id in [a.id, b.id] {
            let stored = store.get_request(id).await.unwrap().unwrap();
            assert_eq!(stored.state, RequestState::UnconfirmedPairing);
        }
    }

    #[tokio::test]
    async fn test_same_user_is_never_paired() {
        let user_id = Uuid::new_v4();
        let a = request_for(user_id, 0);
        let b = request_for(user_id, 1);
        let store = seeded_store(&[a, b.clone()]).await;
        let maker = MatchMaker::with_rng(store, MatchingConfig::default(), heads());

        assert_eq!(maker.try_match(&b).await.unwrap(), MatchOutcome::NoMatch);
    }

    #[tokio::test]
    async fn test_oldest_compatible_candidate_wins() {
        let oldest = request_for(Uuid::new_v4(), -20);
        let newer = request_for(Uuid::new_v4(), -10);
        let requester = request_for(Uuid::new_v4(), 0);
        let store = seeded_store(&[newer.clone(), requester.clone(), oldest.clone()]).await;
        let maker = MatchMaker::with_rng(store, MatchingConfig::default(), heads());

        let outcome = maker.try_match(&requester).await.unwrap();
        let pairing = &outcome.pairing().unwrap().pairing;

        assert!(pairing.joins(requester.id, oldest.id));
    }

    #[tokio::test]
    async fn test_conflict_moves_on_to_next_candidate() {
        let mut nine = request_for(Uuid::new_v4(), -20);
        nine.board_size = Preference::Exactly(9);
        let open = request_for(Uuid::new_v4(), -10);
        let mut requester = request_for(Uuid::new_v4(), 0);
        requester.board_size = Preference::Exactly(19);
        let store = seeded_store(&[nine.clone(), open.clone(), requester.clone()]).await;
        let maker = MatchMaker::with_rng(store, MatchingConfig::default(), heads());

        let (outcome, report) = maker.try_match_with_report(&requester).await.unwrap();
        let pairing = &outcome.pairing().unwrap().pairing;

        assert!(pairing.joins(requester.id, open.id));
        assert_eq!(pairing.board_size, 19);
        assert_eq!(report.candidates_evaluated, 2);
        assert_eq!(report.incompatibilities, vec![TermField::BoardSize]);
    }

    #[tokio::test]
    async fn test_paired_candidates_are_skipped() {
        let a = request_for(Uuid::new_v4(), -20);
        let b = request_for(Uuid::new_v4(), -10);
        let c = request_for(Uuid::new_v4(), 0);
        let store = seeded_store(&[a.clone(), b.clone(), c.clone()]).await;
        let maker = MatchMaker::with_rng(store, MatchingConfig::default(), heads());

        let first = maker.try_match(&b).await.unwrap();
        assert!(first.pairing().unwrap().pairing.joins(a.id, b.id));

        // a and b are spoken for
        assert_eq!(maker.try_match(&c).await.unwrap(), MatchOutcome::NoMatch);
        // and b cannot be matched twice
        assert_eq!(maker.try_match(&b).await.unwrap(), MatchOutcome::NoMatch);
    }

    #[tokio::test]
    async fn test_rejected_partner_is_never_reproposed() {
        let a = request_for(Uuid::new_v4(), -10);
        let b = request_for(Uuid::new_v4(), 0);
        let store = seeded_store(&[a.clone(), b.clone()]).await;
        let maker = MatchMaker::with_rng(store.clone(), MatchingConfig::default(), heads());

        let outcome = maker.try_match(&b).await.unwrap();
        let pairing_id = outcome.pairing().unwrap().pairing.id;
        store.reject_pairing(pairing_id).await.unwrap();

        assert_eq!(maker.try_match(&b).await.unwrap(), MatchOutcome::NoMatch);
        assert_eq!(maker.try_match(&a).await.unwrap(), MatchOutcome::NoMatch);

        // Both remain eligible against others
        let c = request_for(Uuid::new_v4(), 10);
        store.register_user(user(c.user_id)).unwrap();
        store.insert_request(c.clone()).await.unwrap();

        let outcome = maker.try_match(&c).await.unwrap();
        assert!(outcome.pairing().unwrap().pairing.joins(a.id, c.id));
    }

    #[tokio::test]
    async fn test_both_black_never_pair() {
        let mut a = request_for(Uuid::new_v4(), -10);
        a.stone_color = Preference::Exactly(StoneColor::Black);
        let mut b = request_for(Uuid::new_v4(), 0);
        b.stone_color = Preference::Exactly(StoneColor::Black);
        let store = seeded_store(&[a, b.clone()]).await;
        let maker = MatchMaker::with_rng(store, MatchingConfig::default(), heads());

        assert_eq!(maker.try_match(&b).await.unwrap(), MatchOutcome::NoMatch);
    }

    #[tokio::test]
    async fn test_explicit_colors_assign_sides() {
        let mut a = request_for(Uuid::new_v4(), -10);
        a.stone_color = Preference::Exactly(StoneColor::Black);
        let b = request_for(Uuid::new_v4(), 0);
        let store = seeded_store(&[a.clone(), b.clone()]).await;
        // Tails would give the requester white anyway; use heads to prove the
        // explicit choice wins over the coin
        let maker = MatchMaker::with_rng(store, MatchingConfig::default(), heads());

        let outcome = maker.try_match(&b).await.unwrap();
        let pairing = &outcome.pairing().unwrap().pairing;
        assert_eq!(pairing.black_request_id, a.id);
        assert_eq!(pairing.white_request_id, b.id);
    }

    #[tokio::test]
    async fn test_unknown_user_is_fatal_and_writes_nothing() {
        let a = request_for(Uuid::new_v4(), -10);
        let b = request_for(Uuid::new_v4(), 0);
        let store = Arc::new(InMemoryRequestStore::new());
        store.register_user(user(b.user_id)).unwrap();
        store.insert_request(a.clone()).await.unwrap();
        store.insert_request(b.clone()).await.unwrap();
        let maker = MatchMaker::with_rng(store.clone(), MatchingConfig::default(), heads());

        let err = maker.try_match(&b).await.unwrap_err();
        assert!(matches!(
            MatchmakingError::from_anyhow(&err),
            Some(MatchmakingError::UserNotFound { .. })
        ));

        assert_eq!(store.pairing_count().unwrap(), 0);
        assert!(store.get_request(a.id).await.unwrap().unwrap().is_pending());
        assert!(store.get_request(b.id).await.unwrap().unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_requester_missing_from_queue_is_no_match() {
        let a = request_for(Uuid::new_v4(), -10);
        let stranger = request_for(Uuid::new_v4(), 0);
        let store = seeded_store(&[a]).await;
        let maker = MatchMaker::with_rng(store, MatchingConfig::default(), heads());

        assert_eq!(maker.try_match(&stranger).await.unwrap(), MatchOutcome::NoMatch);
    }

    #[tokio::test]
    async fn test_commit_failure_is_fatal() {
        let a = request_for(Uuid::new_v4(), -10);
        let b = request_for(Uuid::new_v4(), 0);
        let queue = vec![a.clone(), b.clone()];

        let mut store = MockStore::new();
        store
            .expect_list_pending_requests()
            .returning(move || Ok(queue.clone()));
        store.expect_list_pairings().returning(|| Ok(Vec::new()));
        store
            .expect_find_user_by_id()
            .returning(|id| Ok(Some(user(id))));
        store.expect_commit_pairing().times(1).returning(|_| {
            Err(MatchmakingError::PersistenceWriteFailure {
                message: "connection reset".to_string(),
            }
            .into())
        });
        store.expect_insert_pairing().never();
        store.expect_update_request_state().never();

        let maker = MatchMaker::with_rng(Arc::new(store), MatchingConfig::default(), heads());
        let err = maker.try_match(&b).await.unwrap_err();

        assert!(matches!(
            MatchmakingError::from_anyhow(&err),
            Some(MatchmakingError::PersistenceWriteFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_lost_claims_rescan_then_give_up() {
        let a = request_for(Uuid::new_v4(), -10);
        let b = request_for(Uuid::new_v4(), 0);
        let queue = vec![a.clone(), b.clone()];

        let mut store = MockStore::new();
        store
            .expect_list_pending_requests()
            .times(3)
            .returning(move || Ok(queue.clone()));
        store.expect_list_pairings().returning(|| Ok(Vec::new()));
        store
            .expect_find_user_by_id()
            .returning(|id| Ok(Some(user(id))));
        store.expect_commit_pairing().times(3).returning(|p| {
            Err(MatchmakingError::RequestAlreadyClaimed {
                request_id: p.black_request_id.to_string(),
            }
            .into())
        });

        let config = MatchingConfig {
            max_claim_retries: 2,
            rng_seed: None,
        };
        let maker = MatchMaker::with_rng(Arc::new(store), config, heads());
        let (outcome, report) = maker.try_match_with_report(&b).await.unwrap();

        assert_eq!(outcome, MatchOutcome::NoMatch);
        assert_eq!(report.claim_conflicts, 3);
    }

    #[tokio::test]
    async fn test_seeded_makers_agree() {
        let a = request_for(Uuid::new_v4(), -10);
        let b = request_for(Uuid::new_v4(), 0);

        let config = MatchingConfig {
            max_claim_retries: 3,
            rng_seed: Some(1234),
        };

        let first = {
            let store = seeded_store(&[a.clone(), b.clone()]).await;
            let maker = MatchMaker::new(store, config.clone());
            maker.try_match(&b).await.unwrap()
        };
        let second = {
            let store = seeded_store(&[a.clone(), b.clone()]).await;
            let maker = MatchMaker::new(store, config);
            maker.try_match(&b).await.unwrap()
        };

        assert_eq!(
            first.pairing().unwrap().pairing.black_request_id,
            second.pairing().unwrap().pairing.black_request_id
        );
    }
}
