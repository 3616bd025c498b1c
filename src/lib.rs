//! Cat Arena - pairwise voting and Elo ranking service
//!
//! Voters are shown two cats at a time, pick a winner, and the ratings of both
//! cats move by a zero-sum Elo update. Each vote is bound to a short-lived
//! capability token and admitted at most once per voter per pair.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use crate::core::{elo_update, expected_score, select_pair, ArenaError, MatchSession, RatingEngine, VoteAdmission};
pub use crate::models::{Cat, Matchup, PairKey, RatingOutcome, UnorderedPair};
