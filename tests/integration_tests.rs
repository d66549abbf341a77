//! Integration tests for the goban-matchmaker service
//!
//! These run the matching engine, the pairing manager and the message
//! dispatch path together against the in-memory store.

mod fixtures;

use async_trait::async_trait;
use goban_matchmaker::amqp::handlers::{dispatch_message, DispatchOutcome, MessageHandler};
use goban_matchmaker::amqp::messages::OutboundEvent;
use goban_matchmaker::error::{MatchmakingError, Result};
use goban_matchmaker::matching::{MatchMaker, MatchOutcome, MatchingConfig, PairingManager};
use goban_matchmaker::store::{InMemoryRequestStore, RequestStore};
use goban_matchmaker::types::{
    KoRule, MatchRequest, RejectPairing, RequestState, ScoringSystem, StoneColor,
    SubmitGameRequest,
};
use std::sync::Arc;
use uuid::Uuid;

use fixtures::{heads, open_submission, register_user, tails, RequestBuilder, TestSystem};

fn maker_for(store: &Arc<InMemoryRequestStore>, rng: Box<dyn rand::RngCore + Send>) -> MatchMaker {
    MatchMaker::with_rng(store.clone(), MatchingConfig::default(), rng)
}

#[tokio::test]
async fn test_identical_explicit_terms_pair_with_those_terms() {
    let store = Arc::new(InMemoryRequestStore::new());
    let alice = register_user(&store, "alice");
    let bob = register_user(&store, "bob");

    let first = RequestBuilder::for_user(alice.id)
        .queued_at(0)
        .board_size(13)
        .handicap(3)
        .komi(2.5)
        .ko_rule(KoRule::SituationalSuperko)
        .scoring(ScoringSystem::Territory)
        .color(StoneColor::White)
        .insert(&store)
        .await;
    let second = RequestBuilder::for_user(bob.id)
        .queued_at(1)
        .board_size(13)
        .handicap(3)
        .komi(2.5)
        .ko_rule(KoRule::SituationalSuperko)
        .scoring(ScoringSystem::Territory)
        .color(StoneColor::Black)
        .insert(&store)
        .await;

    let outcome = maker_for(&store, heads()).try_match(&second).await.unwrap();
    let proposed = outcome.pairing().expect("expected a pairing");

    assert_eq!(proposed.pairing.board_size, 13);
    assert_eq!(proposed.pairing.handicap, 3);
    assert_eq!(proposed.pairing.komi, 2.5);
    assert_eq!(proposed.pairing.ko_rule, KoRule::SituationalSuperko);
    assert_eq!(proposed.pairing.scoring_system, ScoringSystem::Territory);
    assert_eq!(proposed.pairing.black_request_id, second.id);
    assert_eq!(proposed.pairing.white_request_id, first.id);
    assert_eq!(proposed.black_player, bob);
    assert_eq!(proposed.white_player, alice);
}

#[tokio::test]
async fn test_open_requests_get_domain_defaults() {
    let store = Arc::new(InMemoryRequestStore::new());
    let alice = register_user(&store, "alice");
    let bob = register_user(&store, "bob");

    let first = RequestBuilder::for_user(alice.id)
        .queued_at(0)
        .insert(&store)
        .await;
    let second = RequestBuilder::for_user(bob.id)
        .queued_at(1)
        .insert(&store)
        .await;

    let outcome = maker_for(&store, tails()).try_match(&second).await.unwrap();
    let pairing = &outcome.pairing().expect("expected a pairing").pairing;

    assert_eq!(pairing.board_size, 19);
    assert_eq!(pairing.handicap, 0);
    assert_eq!(pairing.scoring_system, ScoringSystem::Area);
    assert_eq!(pairing.komi, 7.5);
    assert_eq!(pairing.ko_rule, KoRule::Simple);
    // Tails gives the requester white
    assert_eq!(pairing.white_request_id, second.id);
    assert_eq!(pairing.black_request_id, first.id);
}

#[tokio::test]
async fn test_colors_split_evenly_over_seeded_trials() {
    let trials = 400u64;
    let mut requester_black = 0;

    for seed in 0..trials {
        let store = Arc::new(InMemoryRequestStore::new());
        let alice = register_user(&store, "alice");
        let bob = register_user(&store, "bob");
        RequestBuilder::for_user(alice.id)
            .queued_at(0)
            .insert(&store)
            .await;
        let second = RequestBuilder::for_user(bob.id)
            .queued_at(1)
            .insert(&store)
            .await;

        let config = MatchingConfig {
            rng_seed: Some(seed),
            ..MatchingConfig::default()
        };
        let maker = MatchMaker::new(store.clone(), config);
        let outcome = maker.try_match(&second).await.unwrap();

        if outcome.pairing().expect("expected a pairing").pairing.black_request_id == second.id {
            requester_black += 1;
        }
    }

    // Five standard deviations either side of 200
    assert!(
        (150..=250).contains(&requester_black),
        "requester took black {} times out of {}",
        requester_black,
        trials
    );
}

#[tokio::test]
async fn test_handicap_without_komi_preference_gives_half_point() {
    let store = Arc::new(InMemoryRequestStore::new());
    let alice = register_user(&store, "alice");
    let bob = register_user(&store, "bob");

    RequestBuilder::for_user(alice.id)
        .queued_at(0)
        .handicap(4)
        .insert(&store)
        .await;
    let second = RequestBuilder::for_user(bob.id)
        .queued_at(1)
        .scoring(ScoringSystem::Territory)
        .insert(&store)
        .await;

    let outcome = maker_for(&store, heads()).try_match(&second).await.unwrap();
    let pairing = &outcome.pairing().expect("expected a pairing").pairing;

    assert_eq!(pairing.handicap, 4);
    assert_eq!(pairing.scoring_system, ScoringSystem::Territory);
    assert_eq!(pairing.komi, 0.5);
}

#[tokio::test]
async fn test_oldest_eligible_candidate_is_chosen() {
    let store = Arc::new(InMemoryRequestStore::new());
    let users: Vec<_> = (0..4)
        .map(|i| register_user(&store, &format!("player-{}", i)))
        .collect();

    // Inserted out of order; queue order is by create_time
    let newest = RequestBuilder::for_user(users[0].id)
        .queued_at(30)
        .insert(&store)
        .await;
    let oldest = RequestBuilder::for_user(users[1].id)
        .queued_at(10)
        .insert(&store)
        .await;
    let middle = RequestBuilder::for_user(users[2].id)
        .queued_at(20)
        .insert(&store)
        .await;
    let requester = RequestBuilder::for_user(users[3].id)
        .queued_at(40)
        .insert(&store)
        .await;

    let outcome = maker_for(&store, heads()).try_match(&requester).await.unwrap();
    let pairing = &outcome.pairing().expect("expected a pairing").pairing;
    assert!(pairing.joins(requester.id, oldest.id));

    for untouched in [newest.id, middle.id] {
        let stored = store.get_request(untouched).await.unwrap().unwrap();
        assert_eq!(stored.state, RequestState::Pending);
    }
}

#[tokio::test]
async fn test_board_size_conflict_moves_on_to_next_candidate() {
    let store = Arc::new(InMemoryRequestStore::new());
    let alice = register_user(&store, "alice");
    let bob = register_user(&store, "bob");
    let carol = register_user(&store, "carol");

    let nine = RequestBuilder::for_user(alice.id)
        .queued_at(0)
        .board_size(9)
        .insert(&store)
        .await;
    let open = RequestBuilder::for_user(bob.id)
        .queued_at(1)
        .insert(&store)
        .await;
    let nineteen = RequestBuilder::for_user(carol.id)
        .queued_at(2)
        .board_size(19)
        .insert(&store)
        .await;

    let (outcome, report) = maker_for(&store, heads())
        .try_match_with_report(&nineteen)
        .await
        .unwrap();
    let pairing = &outcome.pairing().expect("expected a pairing").pairing;

    assert!(pairing.joins(nineteen.id, open.id));
    assert_eq!(pairing.board_size, 19);
    assert_eq!(report.candidates_evaluated, 2);
    assert_eq!(report.incompatibilities.len(), 1);

    let stored = store.get_request(nine.id).await.unwrap().unwrap();
    assert_eq!(stored.state, RequestState::Pending);
}

#[tokio::test]
async fn test_both_black_never_pair() {
    let store = Arc::new(InMemoryRequestStore::new());
    let alice = register_user(&store, "alice");
    let bob = register_user(&store, "bob");

    RequestBuilder::for_user(alice.id)
        .queued_at(0)
        .color(StoneColor::Black)
        .insert(&store)
        .await;
    let second = RequestBuilder::for_user(bob.id)
        .queued_at(1)
        .color(StoneColor::Black)
        .insert(&store)
        .await;

    let outcome = maker_for(&store, heads()).try_match(&second).await.unwrap();
    assert_eq!(outcome, MatchOutcome::NoMatch);
    assert_eq!(store.pairing_count().unwrap(), 0);
}

#[tokio::test]
async fn test_same_user_requests_never_pair() {
    let system = TestSystem::new();
    let alice = system.register("alice");

    system
        .manager
        .submit_request(open_submission(alice.id))
        .await
        .unwrap();
    let second = system
        .manager
        .submit_request(open_submission(alice.id))
        .await
        .unwrap();

    assert_eq!(second.outcome, MatchOutcome::NoMatch);
    assert!(system.publisher.proposals().is_empty());
}

#[tokio::test]
async fn test_rejection_memory_is_permanent() {
    let system = TestSystem::new();
    let alice = system.register("alice");
    let bob = system.register("bob");
    let carol = system.register("carol");

    let first = system
        .manager
        .submit_request(open_submission(alice.id))
        .await
        .unwrap();
    let second = system
        .manager
        .submit_request(open_submission(bob.id))
        .await
        .unwrap();
    let pairing_id = second
        .outcome
        .pairing()
        .expect("expected a pairing")
        .pairing
        .id;

    let rejected = system.manager.reject_pairing(pairing_id).await.unwrap();
    assert!(rejected.newly_rejected);
    assert!(rejected.rematches.is_empty());

    // Asking again never brings the rejected pair back together
    for request_id in [first.request_id, second.request_id] {
        let outcome = system.manager.match_request(request_id).await.unwrap();
        assert_eq!(outcome, MatchOutcome::NoMatch);
    }

    // A newcomer pairs with the oldest freed request
    let third = system
        .manager
        .submit_request(open_submission(carol.id))
        .await
        .unwrap();
    let pairing = &third.outcome.pairing().expect("expected a pairing").pairing;
    assert!(pairing.joins(third.request_id, first.request_id));

    let pairings = system.store.list_pairings().await.unwrap();
    assert_eq!(pairings.len(), 2);
    assert!(pairings.iter().any(|p| p.id == pairing_id && p.is_rejected));
}

#[tokio::test]
async fn test_failed_commit_leaves_no_trace() {
    let store = Arc::new(InMemoryRequestStore::new());
    let alice = register_user(&store, "alice");

    let known = RequestBuilder::for_user(alice.id)
        .queued_at(0)
        .insert(&store)
        .await;
    // Owner was never registered
    let orphan = RequestBuilder::for_user(Uuid::new_v4())
        .queued_at(1)
        .insert(&store)
        .await;

    let err = maker_for(&store, heads())
        .try_match(&orphan)
        .await
        .unwrap_err();
    assert!(matches!(
        MatchmakingError::from_anyhow(&err),
        Some(MatchmakingError::UserNotFound { .. })
    ));

    assert_eq!(store.pairing_count().unwrap(), 0);
    for id in [known.id, orphan.id] {
        let stored = store.get_request(id).await.unwrap().unwrap();
        assert_eq!(stored.state, RequestState::Pending);
    }
}

#[tokio::test]
async fn test_rejection_rematches_freed_requests() {
    use goban_matchmaker::types::Preference;

    let system = TestSystem::new();
    let alice = system.register("alice");
    let bob = system.register("bob");
    let carol = system.register("carol");

    let mut nineteen_only = open_submission(alice.id);
    nineteen_only.board_size = Preference::Exactly(19);
    let alice_request = system.manager.submit_request(nineteen_only).await.unwrap();

    // Bob only plays 9x9, so he keeps waiting
    let mut nine_only = open_submission(bob.id);
    nine_only.board_size = Preference::Exactly(9);
    let bob_request = system.manager.submit_request(nine_only).await.unwrap();
    assert_eq!(bob_request.outcome, MatchOutcome::NoMatch);

    let carol_request = system
        .manager
        .submit_request(open_submission(carol.id))
        .await
        .unwrap();
    let pairing = &carol_request
        .outcome
        .pairing()
        .expect("expected a pairing")
        .pairing;
    assert!(pairing.joins(carol_request.request_id, alice_request.request_id));

    system.publisher.clear_events();
    let rejected = system.manager.reject_pairing(pairing.id).await.unwrap();

    // Alice is older but has nobody left; Carol moves on to Bob at 9x9
    assert_eq!(rejected.rematches.len(), 1);
    let rematch = &rejected.rematches[0].pairing;
    assert!(rematch.joins(carol_request.request_id, bob_request.request_id));
    assert_eq!(rematch.board_size, 9);

    let events = system.publisher.get_published_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], OutboundEvent::PairingRejected(_)));
    assert!(matches!(events[1], OutboundEvent::PairingProposed(_)));

    let alice_state = system
        .store
        .get_request(alice_request.request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alice_state.state, RequestState::Pending);
}

/// Forwards dispatched messages to a pairing manager
struct ManagerHandler {
    manager: PairingManager,
}

#[async_trait]
impl MessageHandler for ManagerHandler {
    async fn handle_submit_request(&self, request: SubmitGameRequest) -> Result<()> {
        self.manager.submit_request(request).await.map(|_| ())
    }

    async fn handle_match_request(&self, request: MatchRequest) -> Result<()> {
        self.manager
            .match_request(request.request_id)
            .await
            .map(|_| ())
    }

    async fn handle_reject_pairing(&self, request: RejectPairing) -> Result<()> {
        self.manager
            .reject_pairing(request.pairing_id)
            .await
            .map(|_| ())
    }

    async fn handle_error(&self, _error: &anyhow::Error, _message_data: &[u8]) {}
}

#[tokio::test]
async fn test_bad_envelopes_change_nothing() {
    let system = TestSystem::new();
    let alice = system.register("alice");
    let handler = ManagerHandler {
        manager: system.manager.clone(),
    };

    let unknown_type = format!(r#"{{"type":"resign","data":{{"user_id":"{}"}}}}"#, alice.id);
    let bad_board = format!(
        r#"{{"type":"submit_game_request","data":{{"user_id":"{}","board_size":42}}}}"#,
        alice.id
    );
    let inputs: Vec<&[u8]> = vec![
        b"not json at all",
        br#"{"data":{}}"#,
        br#"{"type":"submit_game_request"}"#,
        br#"{"type":7,"data":{}}"#,
        br#"["submit_game_request",{}]"#,
        unknown_type.as_bytes(),
        bad_board.as_bytes(),
    ];

    for input in inputs {
        let dispatch = dispatch_message(&handler, input).await;
        assert_ne!(dispatch.outcome, DispatchOutcome::Handled);
        assert_ne!(dispatch.outcome, DispatchOutcome::Failed);
    }

    assert_eq!(system.store.request_count().unwrap(), 0);
    assert!(system.publisher.get_published_events().is_empty());
}

#[tokio::test]
async fn test_envelopes_drive_full_lifecycle() {
    let system = TestSystem::new();
    let alice = system.register("alice");
    let bob = system.register("bob");
    let handler = ManagerHandler {
        manager: system.manager.clone(),
    };

    for user in [&alice, &bob] {
        let raw = format!(
            r#"{{"type":"submit_game_request","data":{{"user_id":"{}","board_size":13,"komi":null}}}}"#,
            user.id
        );
        let dispatch = dispatch_message(&handler, raw.as_bytes()).await;
        assert_eq!(dispatch.outcome, DispatchOutcome::Handled);
    }

    let proposals = system.publisher.proposals();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].pairing.board_size, 13);

    let raw = format!(
        r#"{{"type":"reject_pairing","data":{{"pairing_id":"{}"}}}}"#,
        proposals[0].pairing.id
    );
    let dispatch = dispatch_message(&handler, raw.as_bytes()).await;
    assert_eq!(dispatch.outcome, DispatchOutcome::Handled);

    // Unknown pairing ids are dropped, not treated as failures
    let raw = format!(
        r#"{{"type":"reject_pairing","data":{{"pairing_id":"{}"}}}}"#,
        Uuid::new_v4()
    );
    let dispatch = dispatch_message(&handler, raw.as_bytes()).await;
    assert_eq!(dispatch.outcome, DispatchOutcome::Dropped);

    let stats = system.manager.get_stats().await.unwrap();
    assert_eq!(stats.requests_submitted, 2);
    assert_eq!(stats.pairings_created, 1);
    assert_eq!(stats.pairings_rejected, 1);
    assert_eq!(stats.requests_pending, 2);
    assert_eq!(stats.pairings_active, 0);
}
