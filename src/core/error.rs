use thiserror::Error;

use crate::services::{StoreError, TokenError};

/// Typed failures of the arena engine, returned to the HTTP boundary as-is
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("At least two cats are required to build a match (found {available})")]
    InsufficientItems { available: usize },

    #[error("Action token is invalid or expired")]
    InvalidOrExpiredToken,

    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    #[error("Vote already recorded for this match")]
    DuplicateVote,

    #[error("Cat not found: {0}")]
    ItemNotFound(String),

    #[error("Voter has already voted on every available pair")]
    PairsExhausted,

    #[error("Failed to issue action token: {0}")]
    TokenIssue(#[source] TokenError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ArenaError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ArenaError::InsufficientItems { .. } => "insufficient_items",
            ArenaError::InvalidOrExpiredToken => "invalid_or_expired_token",
            ArenaError::InvalidVote(_) => "invalid_vote",
            ArenaError::DuplicateVote => "duplicate_vote",
            ArenaError::ItemNotFound(_) => "item_not_found",
            ArenaError::PairsExhausted => "pairs_exhausted",
            ArenaError::TokenIssue(_) => "token_issue_failed",
            ArenaError::Store(_) => "storage_error",
        }
    }
}
