//! In-memory request store
//!
//! All tables live behind one lock so that every multi-record write is a
//! single critical section: validation runs first, mutation only after every
//! precondition has passed.

use crate::error::{MatchmakingError, Result};
use crate::store::{RejectedPairing, RequestStore};
use crate::types::{
    GameRequest, GameRequestPairing, PairingId, RequestId, RequestState, User, UserId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct Tables {
    requests: HashMap<RequestId, GameRequest>,
    pairings: HashMap<PairingId, GameRequestPairing>,
    users: HashMap<UserId, User>,
}

impl Tables {
    fn require_pending(&self, request_id: RequestId) -> Result<()> {
        let request = self.requests.get(&request_id).ok_or_else(|| {
            MatchmakingError::RequestNotFound {
                request_id: request_id.to_string(),
            }
        })?;

        if request.state != RequestState::Pending {
            return Err(MatchmakingError::RequestAlreadyClaimed {
                request_id: request_id.to_string(),
            }
            .into());
        }

        Ok(())
    }
}

/// Request store kept entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    tables: RwLock<Tables>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire store read lock".to_string(),
            }
            .into()
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| {
            MatchmakingError::PersistenceWriteFailure {
                message: "Failed to acquire store write lock".to_string(),
            }
            .into()
        })
    }

    /// Add or replace a user record
    pub fn register_user(&self, user: User) -> Result<()> {
        let mut tables = self.write()?;
        tables.users.insert(user.id, user);
        Ok(())
    }

    /// Remove a request once its game has been confirmed elsewhere
    pub fn remove_request(&self, request_id: RequestId) -> Result<Option<GameRequest>> {
        let mut tables = self.write()?;
        Ok(tables.requests.remove(&request_id))
    }

    pub fn request_count(&self) -> Result<usize> {
        Ok(self.read()?.requests.len())
    }

    pub fn pairing_count(&self) -> Result<usize> {
        Ok(self.read()?.pairings.len())
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn list_pending_requests(&self) -> Result<Vec<GameRequest>> {
        let tables = self.read()?;

        let mut requests: Vec<GameRequest> = tables
            .requests
            .values()
            .filter(|request| request.is_pending())
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id)));

        Ok(requests)
    }

    async fn list_pairings(&self) -> Result<Vec<GameRequestPairing>> {
        let tables = self.read()?;

        let mut pairings: Vec<GameRequestPairing> = tables.pairings.values().cloned().collect();
        pairings.sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id)));

        Ok(pairings)
    }

    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.read()?.users.get(&user_id).cloned())
    }

    async fn insert_pairing(&self, pairing: GameRequestPairing) -> Result<PairingId> {
        let mut tables = self.write()?;

        if tables.pairings.contains_key(&pairing.id) {
            return Err(MatchmakingError::PersistenceWriteFailure {
                message: format!("Pairing {} already exists", pairing.id),
            }
            .into());
        }

        let pairing_id = pairing.id;
        tables.pairings.insert(pairing_id, pairing);
        Ok(pairing_id)
    }

    async fn update_request_state(
        &self,
        request_id: RequestId,
        state: RequestState,
    ) -> Result<()> {
        let mut tables = self.write()?;

        let request = tables.requests.get_mut(&request_id).ok_or_else(|| {
            MatchmakingError::PersistenceWriteFailure {
                message: format!("Cannot update missing request {}", request_id),
            }
        })?;
        request.state = state;
        Ok(())
    }

    async fn claim_request(
        &self,
        request_id: RequestId,
        expected: RequestState,
        next: RequestState,
    ) -> Result<bool> {
        let mut tables = self.write()?;

        match tables.requests.get_mut(&request_id) {
            Some(request) if request.state == expected => {
                request.state = next;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(MatchmakingError::RequestNotFound {
                request_id: request_id.to_string(),
            }
            .into()),
        }
    }

    async fn commit_pairing(&self, pairing: GameRequestPairing) -> Result<PairingId> {
        let mut tables = self.write()?;

        if pairing.black_request_id == pairing.white_request_id {
            return Err(MatchmakingError::PersistenceWriteFailure {
                message: format!("Pairing {} joins a request with itself", pairing.id),
            }
            .into());
        }
        if tables.pairings.contains_key(&pairing.id) {
            return Err(MatchmakingError::PersistenceWriteFailure {
                message: format!("Pairing {} already exists", pairing.id),
            }
            .into());
        }
        tables.require_pending(pairing.black_request_id)?;
        tables.require_pending(pairing.white_request_id)?;

        for request_id in [pairing.black_request_id, pairing.white_request_id] {
            if let Some(request) = tables.requests.get_mut(&request_id) {
                request.state = RequestState::UnconfirmedPairing;
            }
        }

        let pairing_id = pairing.id;
        tables.pairings.insert(pairing_id, pairing);

        debug!("Committed pairing {}", pairing_id);
        Ok(pairing_id)
    }

    async fn insert_request(&self, request: GameRequest) -> Result<RequestId> {
        let mut tables = self.write()?;

        if tables.requests.contains_key(&request.id) {
            return Err(MatchmakingError::PersistenceWriteFailure {
                message: format!("Game request {} already exists", request.id),
            }
            .into());
        }

        let request_id = request.id;
        tables.requests.insert(request_id, request);
        Ok(request_id)
    }

    async fn get_request(&self, request_id: RequestId) -> Result<Option<GameRequest>> {
        Ok(self.read()?.requests.get(&request_id).cloned())
    }

    async fn get_pairing(&self, pairing_id: PairingId) -> Result<Option<GameRequestPairing>> {
        Ok(self.read()?.pairings.get(&pairing_id).cloned())
    }

    async fn reject_pairing(&self, pairing_id: PairingId) -> Result<RejectedPairing> {
        let mut tables = self.write()?;

        let pairing = tables.pairings.get(&pairing_id).cloned().ok_or_else(|| {
            MatchmakingError::PairingNotFound {
                pairing_id: pairing_id.to_string(),
            }
        })?;

        if pairing.is_rejected {
            return Ok(RejectedPairing {
                pairing,
                newly_rejected: false,
            });
        }

        for request_id in [pairing.black_request_id, pairing.white_request_id] {
            if let Some(request) = tables.requests.get_mut(&request_id) {
                request.state = RequestState::Pending;
            }
        }

        let rejected = GameRequestPairing {
            is_rejected: true,
            ..pairing
        };
        tables.pairings.insert(pairing_id, rejected.clone());

        Ok(RejectedPairing {
            pairing: rejected,
            newly_rejected: true,
        })
    }
}
