//! Per-field compatibility rules for pairing two game requests
//!
//! Every rule is a pure function from two preferences to a [`Resolution`].
//! [`resolve_terms`] runs them in a fixed order and stops at the first
//! incompatible field.

use crate::types::{
    BoardSize, GameRequest, Handicap, KoRule, Komi, Preference, ScoringSystem, StoneColor,
    DEFAULT_BOARD_SIZE, DEFAULT_HANDICAP,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Komi for even games under area scoring
pub const AREA_KOMI: Komi = 7.5;

/// Komi for even games under territory scoring
pub const TERRITORY_KOMI: Komi = 6.5;

/// Komi whenever handicap stones are placed
pub const HANDICAP_KOMI: Komi = 0.5;

/// Outcome of resolving one field between two requests
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<T> {
    Compatible(T),
    Incompatible,
}

impl<T> Resolution<T> {
    pub fn is_compatible(&self) -> bool {
        matches!(self, Resolution::Compatible(_))
    }

    /// Convert to a `Result`, tagging an incompatibility with its field
    pub fn or_conflict(self, field: TermField) -> Result<T, Incompatibility> {
        match self {
            Resolution::Compatible(value) => Ok(value),
            Resolution::Incompatible => Err(Incompatibility { field }),
        }
    }
}

/// The game terms, in the order they are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermField {
    BoardSize,
    Handicap,
    KoRule,
    ScoringSystem,
    Komi,
    StoneColor,
}

impl TermField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermField::BoardSize => "board_size",
            TermField::Handicap => "handicap",
            TermField::KoRule => "ko_rule",
            TermField::ScoringSystem => "scoring_system",
            TermField::Komi => "komi",
            TermField::StoneColor => "stone_color",
        }
    }
}

impl std::fmt::Display for TermField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The first field on which two requests could not agree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Incompatibility {
    pub field: TermField,
}

/// Fully resolved terms for a game between two requests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedTerms {
    pub board_size: BoardSize,
    pub handicap: Handicap,
    pub ko_rule: KoRule,
    pub scoring_system: ScoringSystem,
    pub komi: Komi,
    /// Color taken by the request being matched; the candidate gets the other one
    pub requester_color: StoneColor,
}

/// The shared three-case rule: equal values or one-sided preferences agree,
/// two open preferences take the default, two different values conflict.
fn resolve_preference<T>(
    requester: &Preference<T>,
    candidate: &Preference<T>,
    default: T,
) -> Resolution<T>
where
    T: Clone + PartialEq,
{
    match (requester, candidate) {
        (Preference::NoPreference, Preference::NoPreference) => Resolution::Compatible(default),
        (Preference::Exactly(value), Preference::NoPreference)
        | (Preference::NoPreference, Preference::Exactly(value)) => {
            Resolution::Compatible(value.clone())
        }
        (Preference::Exactly(a), Preference::Exactly(b)) if a == b => {
            Resolution::Compatible(a.clone())
        }
        (Preference::Exactly(_), Preference::Exactly(_)) => Resolution::Incompatible,
    }
}

pub fn resolve_board_size(
    requester: &Preference<BoardSize>,
    candidate: &Preference<BoardSize>,
) -> Resolution<BoardSize> {
    resolve_preference(requester, candidate, DEFAULT_BOARD_SIZE)
}

pub fn resolve_handicap(
    requester: &Preference<Handicap>,
    candidate: &Preference<Handicap>,
) -> Resolution<Handicap> {
    resolve_preference(requester, candidate, DEFAULT_HANDICAP)
}

pub fn resolve_ko_rule(
    requester: &Preference<KoRule>,
    candidate: &Preference<KoRule>,
) -> Resolution<KoRule> {
    resolve_preference(requester, candidate, KoRule::default())
}

pub fn resolve_scoring_system(
    requester: &Preference<ScoringSystem>,
    candidate: &Preference<ScoringSystem>,
) -> Resolution<ScoringSystem> {
    resolve_preference(requester, candidate, ScoringSystem::default())
}

/// Komi used when neither side asked for one
pub fn default_komi(handicap: Handicap, scoring_system: ScoringSystem) -> Komi {
    if handicap != 0 {
        return HANDICAP_KOMI;
    }

    match scoring_system {
        ScoringSystem::Area => AREA_KOMI,
        ScoringSystem::Territory => TERRITORY_KOMI,
    }
}

/// Resolve komi against the already resolved handicap and scoring system
pub fn resolve_komi(
    requester: &Preference<Komi>,
    candidate: &Preference<Komi>,
    handicap: Handicap,
    scoring_system: ScoringSystem,
) -> Resolution<Komi> {
    resolve_preference(requester, candidate, default_komi(handicap, scoring_system))
}

/// Resolve which color the requester plays.
///
/// Unlike the other fields, equal explicit colors conflict and different
/// explicit colors agree. The coin is only flipped when neither side cares.
pub fn resolve_stone_color<R>(
    requester: &Preference<StoneColor>,
    candidate: &Preference<StoneColor>,
    rng: &mut R,
) -> Resolution<StoneColor>
where
    R: Rng + ?Sized,
{
    match (requester, candidate) {
        (Preference::NoPreference, Preference::NoPreference) => {
            if rng.gen_bool(0.5) {
                Resolution::Compatible(StoneColor::Black)
            } else {
                Resolution::Compatible(StoneColor::White)
            }
        }
        (Preference::Exactly(mine), Preference::Exactly(theirs)) if mine == theirs => {
            Resolution::Incompatible
        }
        (Preference::Exactly(mine), _) => Resolution::Compatible(*mine),
        (Preference::NoPreference, Preference::Exactly(theirs)) => {
            Resolution::Compatible(theirs.opposite())
        }
    }
}

/// Resolve every term between `requester` and `candidate`, in order:
/// board size, handicap, ko rule, scoring system, komi, stone color.
pub fn resolve_terms<R>(
    requester: &GameRequest,
    candidate: &GameRequest,
    rng: &mut R,
) -> Result<ResolvedTerms, Incompatibility>
where
    R: Rng + ?Sized,
{
    let board_size = resolve_board_size(&requester.board_size, &candidate.board_size)
        .or_conflict(TermField::BoardSize)?;
    let handicap = resolve_handicap(&requester.handicap, &candidate.handicap)
        .or_conflict(TermField::Handicap)?;
    let ko_rule =
        resolve_ko_rule(&requester.ko_rule, &candidate.ko_rule).or_conflict(TermField::KoRule)?;
    let scoring_system =
        resolve_scoring_system(&requester.scoring_system, &candidate.scoring_system)
            .or_conflict(TermField::ScoringSystem)?;
    let komi = resolve_komi(&requester.komi, &candidate.komi, handicap, scoring_system)
        .or_conflict(TermField::Komi)?;
    let requester_color = resolve_stone_color(&requester.stone_color, &candidate.stone_color, rng)
        .or_conflict(TermField::StoneColor)?;

    Ok(ResolvedTerms {
        board_size,
        handicap,
        ko_rule,
        scoring_system,
        komi,
        requester_color,
    })
}
