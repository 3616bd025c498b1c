// Service exports
pub mod cache;
pub mod memory;
pub mod postgres;
pub mod seed;
pub mod token;

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

use crate::models::{Cat, NewCat, PairKey, PendingMatch, RatingChange, UnorderedPair, VoteRecord};

pub use cache::{CacheManager, CacheKey, CacheError};
pub use memory::InMemoryStore;
pub use postgres::{PostgresClient, PostgresError};
pub use token::{CapabilityIssuer, CapabilityClaims, ChooseParams, Grant, JwtCapabilityIssuer, TokenError};

/// Backend-agnostic storage failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Postgres(#[from] PostgresError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Ratings and match counts of every cat
#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Cat>, StoreError>;

    async fn get(&self, cat_id: &str) -> Result<Option<Cat>, StoreError>;

    /// Add `delta` to a cat's rating and increment its match count by one,
    /// atomically for that cat
    ///
    /// Fails with [`StoreError::NotFound`] when the cat does not exist.
    async fn apply_delta(&self, cat_id: &str, delta: i32) -> Result<Cat, StoreError>;

    /// Apply both sides of a result as one unit: either both cats change or
    /// neither does
    ///
    /// Returns the updated (winner, loser).
    async fn apply_pair(&self, winner: &RatingChange, loser: &RatingChange) -> Result<(Cat, Cat), StoreError>;

    /// Add a cat unless one with the same id exists; returns whether it was inserted
    async fn insert_if_absent(&self, cat: Cat) -> Result<bool, StoreError>;
}

/// Resolved votes, one per voter per unordered pair
#[async_trait]
pub trait VoteLedger: Send + Sync {
    async fn exists(&self, key: &PairKey) -> Result<bool, StoreError>;

    /// Atomic create-if-absent; `false` means the pair was already resolved
    async fn record(&self, record: &VoteRecord) -> Result<bool, StoreError>;

    /// Drop a record whose vote could not be applied
    async fn release(&self, key: &PairKey) -> Result<(), StoreError>;

    async fn resolved_pairs(&self, voter_id: &str) -> Result<HashSet<UnorderedPair>, StoreError>;
}

/// Per-voter in-flight match
#[async_trait]
pub trait PendingMatchStore: Send + Sync {
    async fn get(&self, voter_id: &str) -> Result<Option<PendingMatch>, StoreError>;

    async fn set(&self, pending: &PendingMatch) -> Result<(), StoreError>;

    /// Store a pending match unless the voter already has one; returns whether it was stored
    async fn set_if_absent(&self, pending: &PendingMatch) -> Result<bool, StoreError>;

    async fn delete(&self, voter_id: &str) -> Result<(), StoreError>;
}

/// Global running total of accepted votes
#[async_trait]
pub trait VoteCounter: Send + Sync {
    async fn increment(&self) -> Result<(), StoreError>;

    async fn read(&self) -> Result<u64, StoreError>;
}

/// Insert every seed cat that is not stored yet; returns how many were added
pub async fn import_cats(
    store: &dyn RatingStore,
    cats: Vec<NewCat>,
    initial_rating: i32,
) -> Result<usize, StoreError> {
    let mut inserted = 0;
    for cat in cats {
        if store.insert_if_absent(cat.into_cat(initial_rating)).await? {
            inserted += 1;
        }
    }
    Ok(inserted)
}
