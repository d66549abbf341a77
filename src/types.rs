//! Common types used throughout the matchmaking service

use crate::utils::{current_timestamp, generate_request_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users
pub type UserId = Uuid;

/// Unique identifier for game requests
pub type RequestId = Uuid;

/// Unique identifier for pairings
pub type PairingId = Uuid;

/// Number of lines on each side of the board
pub type BoardSize = u8;

/// Number of handicap stones, 0 meaning no handicap
pub type Handicap = u8;

/// Compensation points for White
pub type Komi = f64;

/// Default board size when neither side cares
pub const DEFAULT_BOARD_SIZE: BoardSize = 19;

/// Default handicap when neither side cares
pub const DEFAULT_HANDICAP: Handicap = 0;

/// A per-field preference on a game request
///
/// Serialized as `null` for no preference and as the bare value otherwise,
/// so an absent JSON field also reads as no preference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<T>", into = "Option<T>")]
pub enum Preference<T: Clone> {
    NoPreference,
    Exactly(T),
}

impl<T: Clone> Default for Preference<T> {
    fn default() -> Self {
        Preference::NoPreference
    }
}

impl<T: Clone> Preference<T> {
    pub fn is_no_preference(&self) -> bool {
        matches!(self, Preference::NoPreference)
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Preference::NoPreference => None,
            Preference::Exactly(value) => Some(value),
        }
    }
}

impl<T: Clone> From<Option<T>> for Preference<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Preference::Exactly(value),
            None => Preference::NoPreference,
        }
    }
}

impl<T: Clone> From<Preference<T>> for Option<T> {
    fn from(value: Preference<T>) -> Self {
        match value {
            Preference::Exactly(value) => Some(value),
            Preference::NoPreference => None,
        }
    }
}

/// Rule variant governing repetition of board positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KoRule {
    #[default]
    Simple,
    PositionalSuperko,
    SituationalSuperko,
}

impl std::fmt::Display for KoRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KoRule::Simple => write!(f, "simple"),
            KoRule::PositionalSuperko => write!(f, "positional_superko"),
            KoRule::SituationalSuperko => write!(f, "situational_superko"),
        }
    }
}

/// How the final position is counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringSystem {
    /// Stones on the board plus surrounded territory
    #[default]
    Area,
    /// Surrounded territory only
    Territory,
}

impl std::fmt::Display for ScoringSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringSystem::Area => write!(f, "area"),
            ScoringSystem::Territory => write!(f, "territory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoneColor {
    Black,
    White,
}

impl StoneColor {
    pub fn opposite(self) -> Self {
        match self {
            StoneColor::Black => StoneColor::White,
            StoneColor::White => StoneColor::Black,
        }
    }
}

impl std::fmt::Display for StoneColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoneColor::Black => write!(f, "black"),
            StoneColor::White => write!(f, "white"),
        }
    }
}

/// Lifecycle state of a game request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Waiting in the queue, no active pairing
    Pending,
    /// Proposed in exactly one active pairing, awaiting both players
    UnconfirmedPairing,
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestState::Pending => write!(f, "Pending"),
            RequestState::UnconfirmedPairing => write!(f, "UnconfirmedPairing"),
        }
    }
}

/// A registered user of the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
}

/// One user's standing offer to play
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRequest {
    pub id: RequestId,
    pub create_time: DateTime<Utc>,
    pub user_id: UserId,
    #[serde(default)]
    pub board_size: Preference<BoardSize>,
    #[serde(default)]
    pub handicap: Preference<Handicap>,
    #[serde(default)]
    pub komi: Preference<Komi>,
    #[serde(default)]
    pub ko_rule: Preference<KoRule>,
    #[serde(default)]
    pub scoring_system: Preference<ScoringSystem>,
    #[serde(default)]
    pub stone_color: Preference<StoneColor>,
    pub state: RequestState,
}

impl GameRequest {
    /// Create a pending request with no preferences
    pub fn new(user_id: UserId) -> Self {
        Self {
            id: generate_request_id(),
            create_time: current_timestamp(),
            user_id,
            board_size: Preference::NoPreference,
            handicap: Preference::NoPreference,
            komi: Preference::NoPreference,
            ko_rule: Preference::NoPreference,
            scoring_system: Preference::NoPreference,
            stone_color: Preference::NoPreference,
            state: RequestState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == RequestState::Pending
    }
}

/// A proposed game resulting from matching two requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRequestPairing {
    pub id: PairingId,
    pub create_time: DateTime<Utc>,
    pub black_request_id: RequestId,
    pub white_request_id: RequestId,
    pub board_size: BoardSize,
    pub handicap: Handicap,
    pub komi: Komi,
    pub ko_rule: KoRule,
    pub scoring_system: ScoringSystem,
    /// Write-once: never returns to false
    pub is_rejected: bool,
}

impl GameRequestPairing {
    /// Active pairings still hold both of their requests
    pub fn is_active(&self) -> bool {
        !self.is_rejected
    }

    pub fn involves(&self, request_id: RequestId) -> bool {
        self.black_request_id == request_id || self.white_request_id == request_id
    }

    /// The other side of the pairing, if `request_id` is one side
    pub fn partner_of(&self, request_id: RequestId) -> Option<RequestId> {
        if self.black_request_id == request_id {
            Some(self.white_request_id)
        } else if self.white_request_id == request_id {
            Some(self.black_request_id)
        } else {
            None
        }
    }

    /// True if this pairing joins `a` and `b` in either color order
    pub fn joins(&self, a: RequestId, b: RequestId) -> bool {
        (self.black_request_id == a && self.white_request_id == b)
            || (self.black_request_id == b && self.white_request_id == a)
    }
}

/// A pairing handed back to the caller, with both players resolved for notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedPairing {
    pub pairing: GameRequestPairing,
    pub black_player: User,
    pub white_player: User,
}

/// Inbound message: a user asks to be matched into a game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitGameRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub board_size: Preference<BoardSize>,
    #[serde(default)]
    pub handicap: Preference<Handicap>,
    #[serde(default)]
    pub komi: Preference<Komi>,
    #[serde(default)]
    pub ko_rule: Preference<KoRule>,
    #[serde(default)]
    pub scoring_system: Preference<ScoringSystem>,
    #[serde(default)]
    pub stone_color: Preference<StoneColor>,
}

impl SubmitGameRequest {
    /// A submission with no preferences at all
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            board_size: Preference::NoPreference,
            handicap: Preference::NoPreference,
            komi: Preference::NoPreference,
            ko_rule: Preference::NoPreference,
            scoring_system: Preference::NoPreference,
            stone_color: Preference::NoPreference,
        }
    }

    /// Turn the submission into a fresh pending request
    pub fn into_game_request(self) -> GameRequest {
        GameRequest {
            board_size: self.board_size,
            handicap: self.handicap,
            komi: self.komi,
            ko_rule: self.ko_rule,
            scoring_system: self.scoring_system,
            stone_color: self.stone_color,
            ..GameRequest::new(self.user_id)
        }
    }
}

/// Inbound message: re-run matching for a request already in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub request_id: RequestId,
}

/// Inbound message: one of the players turned down a proposed pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectPairing {
    pub pairing_id: PairingId,
}

/// Event emitted when two requests have been paired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingProposed {
    pub pairing: GameRequestPairing,
    pub black_player: User,
    pub white_player: User,
    pub timestamp: DateTime<Utc>,
}

impl From<ProposedPairing> for PairingProposed {
    fn from(proposed: ProposedPairing) -> Self {
        Self {
            pairing: proposed.pairing,
            black_player: proposed.black_player,
            white_player: proposed.white_player,
            timestamp: Utc::now(),
        }
    }
}

/// Event emitted when a proposed pairing is turned down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingRejected {
    pub pairing_id: PairingId,
    pub black_request_id: RequestId,
    pub white_request_id: RequestId,
    pub timestamp: DateTime<Utc>,
}
