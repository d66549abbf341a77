//! Persistence port for game requests, pairings and users
//!
//! The match maker only talks to storage through [`RequestStore`]. Besides the
//! plain reads and writes, the trait exposes two atomic primitives that make
//! concurrent matching safe: a conditional state transition
//! ([`RequestStore::claim_request`]) and a unit of work that commits a pairing
//! together with both state changes ([`RequestStore::commit_pairing`]).

pub mod memory;

pub use memory::InMemoryRequestStore;

use crate::error::Result;
use crate::types::{
    GameRequest, GameRequestPairing, PairingId, RequestId, RequestState, User, UserId,
};
use async_trait::async_trait;

/// Result of [`RequestStore::reject_pairing`]
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedPairing {
    pub pairing: GameRequestPairing,
    /// True only for the call that flipped `is_rejected`
    pub newly_rejected: bool,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Requests in `Pending`, oldest `create_time` first (ties by id)
    async fn list_pending_requests(&self) -> Result<Vec<GameRequest>>;

    /// Every pairing ever proposed, active and rejected
    async fn list_pairings(&self) -> Result<Vec<GameRequestPairing>>;

    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<User>>;

    /// Plain insert with no state checks. The match maker writes through
    /// [`RequestStore::commit_pairing`] instead.
    async fn insert_pairing(&self, pairing: GameRequestPairing) -> Result<PairingId>;

    /// Unconditional state change. Not used on the matching path, see
    /// [`RequestStore::commit_pairing`].
    async fn update_request_state(&self, request_id: RequestId, state: RequestState)
        -> Result<()>;

    /// Move a request from `expected` to `next` only if it is still in
    /// `expected`. Returns false when another writer got there first.
    /// Single-request primitive; pairing two requests goes through
    /// [`RequestStore::commit_pairing`].
    async fn claim_request(
        &self,
        request_id: RequestId,
        expected: RequestState,
        next: RequestState,
    ) -> Result<bool>;

    /// Insert the pairing and move both of its requests from `Pending` to
    /// `UnconfirmedPairing` as one unit. Either all three writes land or none
    /// do; a request that is no longer pending fails the whole commit with
    /// `RequestAlreadyClaimed`. This is the only write the match maker makes.
    async fn commit_pairing(&self, pairing: GameRequestPairing) -> Result<PairingId>;

    async fn insert_request(&self, request: GameRequest) -> Result<RequestId>;

    async fn get_request(&self, request_id: RequestId) -> Result<Option<GameRequest>>;

    async fn get_pairing(&self, pairing_id: PairingId) -> Result<Option<GameRequestPairing>>;

    /// Mark a pairing rejected and return both of its requests to `Pending`
    /// as one unit. Rejecting an already rejected pairing changes nothing and
    /// reports `newly_rejected: false`, so concurrent rejections of one
    /// pairing are told apart under the same lock that applies them.
    async fn reject_pairing(&self, pairing_id: PairingId) -> Result<RejectedPairing>;
}
