use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::{Cat, PairKey, PendingMatch, RatingChange, UnorderedPair, VoteRecord};
use crate::services::{PendingMatchStore, RatingStore, StoreError, VoteCounter, VoteLedger};

/// In-process store backing every collaborator trait
///
/// Used for local development and tests. State lives only as long as the
/// process; per-key operations are atomic through DashMap's shard locks.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    cats: DashMap<String, Cat>,
    votes: DashMap<PairKey, VoteRecord>,
    pending: DashMap<String, PendingMatch>,
    total_votes: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given cats
    pub fn with_cats(cats: impl IntoIterator<Item = Cat>) -> Self {
        let store = Self::new();
        for cat in cats {
            store.cats.insert(cat.id.clone(), cat);
        }
        store
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    // The shard lock is held only for this one cat
    fn shift(&self, cat_id: &str, delta: i32, matches: i32) -> Result<Cat, StoreError> {
        let mut cat = self
            .cats
            .get_mut(cat_id)
            .ok_or_else(|| StoreError::NotFound(cat_id.to_string()))?;
        cat.rating += delta;
        cat.match_count = cat.match_count.saturating_add_signed(matches);
        Ok(cat.clone())
    }
}

#[async_trait]
impl RatingStore for InMemoryStore {
    async fn list_all(&self) -> Result<Vec<Cat>, StoreError> {
        Ok(self.cats.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn get(&self, cat_id: &str) -> Result<Option<Cat>, StoreError> {
        Ok(self.cats.get(cat_id).map(|entry| entry.value().clone()))
    }

    async fn apply_delta(&self, cat_id: &str, delta: i32) -> Result<Cat, StoreError> {
        self.shift(cat_id, delta, 1)
    }

    async fn apply_pair(&self, winner: &RatingChange, loser: &RatingChange) -> Result<(Cat, Cat), StoreError> {
        let updated_winner = self.shift(&winner.cat_id, winner.delta, 1)?;
        match self.shift(&loser.cat_id, loser.delta, 1) {
            Ok(updated_loser) => Ok((updated_winner, updated_loser)),
            Err(e) => {
                self.shift(&winner.cat_id, -winner.delta, -1)?;
                Err(e)
            }
        }
    }

    async fn insert_if_absent(&self, cat: Cat) -> Result<bool, StoreError> {
        match self.cats.entry(cat.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(cat);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl VoteLedger for InMemoryStore {
    async fn exists(&self, key: &PairKey) -> Result<bool, StoreError> {
        Ok(self.votes.contains_key(key))
    }

    async fn record(&self, record: &VoteRecord) -> Result<bool, StoreError> {
        match self.votes.entry(record.key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &PairKey) -> Result<(), StoreError> {
        self.votes.remove(key);
        Ok(())
    }

    async fn resolved_pairs(&self, voter_id: &str) -> Result<HashSet<UnorderedPair>, StoreError> {
        Ok(self
            .votes
            .iter()
            .filter(|entry| entry.key().voter_id == voter_id)
            .map(|entry| entry.key().pair.clone())
            .collect())
    }
}

#[async_trait]
impl PendingMatchStore for InMemoryStore {
    async fn get(&self, voter_id: &str) -> Result<Option<PendingMatch>, StoreError> {
        Ok(self.pending.get(voter_id).map(|entry| entry.value().clone()))
    }

    async fn set(&self, pending: &PendingMatch) -> Result<(), StoreError> {
        self.pending.insert(pending.voter_id.clone(), pending.clone());
        Ok(())
    }

    async fn set_if_absent(&self, pending: &PendingMatch) -> Result<bool, StoreError> {
        match self.pending.entry(pending.voter_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(pending.clone());
                Ok(true)
            }
        }
    }

    async fn delete(&self, voter_id: &str) -> Result<(), StoreError> {
        self.pending.remove(voter_id);
        Ok(())
    }
}

#[async_trait]
impl VoteCounter for InMemoryStore {
    async fn increment(&self) -> Result<(), StoreError> {
        self.total_votes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn read(&self) -> Result<u64, StoreError> {
        Ok(self.total_votes.load(Ordering::Relaxed))
    }
}
