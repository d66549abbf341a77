//! Game request matching
//!
//! The resolver decides whether two requests agree, the maker walks the
//! queue, and the manager drives the request lifecycle around both.

pub mod maker;
pub mod manager;
pub mod resolver;

pub use maker::{MatchMaker, MatchOutcome, MatchingConfig, ScanReport};
pub use manager::{PairingManager, PairingManagerStats, RejectOutcome, SubmitOutcome};
pub use resolver::{resolve_terms, Incompatibility, Resolution, ResolvedTerms, TermField};
