//! Test fixtures shared by the integration tests

#![allow(dead_code)]

use chrono::{Duration, Utc};
use goban_matchmaker::amqp::publisher::MockEventPublisher;
use goban_matchmaker::matching::{MatchMaker, MatchingConfig, PairingManager};
use goban_matchmaker::metrics::MetricsCollector;
use goban_matchmaker::store::{InMemoryRequestStore, RequestStore};
use goban_matchmaker::types::{
    GameRequest, KoRule, Preference, ScoringSystem, StoneColor, SubmitGameRequest, User, UserId,
};
use rand::rngs::mock::StepRng;
use rand::RngCore;
use std::sync::Arc;
use uuid::Uuid;

/// A store, a recording publisher and a manager wired together
pub struct TestSystem {
    pub store: Arc<InMemoryRequestStore>,
    pub publisher: Arc<MockEventPublisher>,
    pub manager: PairingManager,
}

impl TestSystem {
    /// Coin always lands heads: the request being matched takes black
    pub fn new() -> Self {
        Self::with_rng(heads(), true)
    }

    pub fn with_rng(rng: Box<dyn RngCore + Send>, rematch_after_rejection: bool) -> Self {
        let store = Arc::new(InMemoryRequestStore::new());
        let publisher = Arc::new(MockEventPublisher::new());
        let maker = Arc::new(MatchMaker::with_rng(
            store.clone(),
            MatchingConfig::default(),
            rng,
        ));
        let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));
        let manager = PairingManager::with_maker_and_metrics(
            maker,
            publisher.clone(),
            metrics,
            rematch_after_rejection,
        );

        Self {
            store,
            publisher,
            manager,
        }
    }

    pub fn register(&self, name: &str) -> User {
        register_user(&self.store, name)
    }
}

pub fn heads() -> Box<dyn RngCore + Send> {
    Box::new(StepRng::new(0, 0))
}

pub fn tails() -> Box<dyn RngCore + Send> {
    Box::new(StepRng::new(u64::MAX, 0))
}

pub fn register_user(store: &InMemoryRequestStore, name: &str) -> User {
    let user = User {
        id: Uuid::new_v4(),
        display_name: name.to_string(),
    };
    store
        .register_user(user.clone())
        .expect("user registration");
    user
}

/// Builder for game requests with explicit preferences and queue position
pub struct RequestBuilder {
    request: GameRequest,
}

impl RequestBuilder {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            request: GameRequest::new(user_id),
        }
    }

    /// Position in the queue relative to now
    pub fn queued_at(mut self, offset_secs: i64) -> Self {
        self.request.create_time = Utc::now() + Duration::seconds(offset_secs);
        self
    }

    pub fn board_size(mut self, size: u8) -> Self {
        self.request.board_size = Preference::Exactly(size);
        self
    }

    pub fn handicap(mut self, stones: u8) -> Self {
        self.request.handicap = Preference::Exactly(stones);
        self
    }

    pub fn komi(mut self, komi: f64) -> Self {
        self.request.komi = Preference::Exactly(komi);
        self
    }

    pub fn ko_rule(mut self, rule: KoRule) -> Self {
        self.request.ko_rule = Preference::Exactly(rule);
        self
    }

    pub fn scoring(mut self, system: ScoringSystem) -> Self {
        self.request.scoring_system = Preference::Exactly(system);
        self
    }

    pub fn color(mut self, color: StoneColor) -> Self {
        self.request.stone_color = Preference::Exactly(color);
        self
    }

    pub fn build(self) -> GameRequest {
        self.request
    }

    /// Build and insert into the store
    pub async fn insert(self, store: &InMemoryRequestStore) -> GameRequest {
        let request = self.build();
        store
            .insert_request(request.clone())
            .await
            .expect("request insert");
        request
    }
}

/// A submission with no preferences
pub fn open_submission(user_id: UserId) -> SubmitGameRequest {
    SubmitGameRequest::new(user_id)
}
