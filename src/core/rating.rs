use std::sync::Arc;

use crate::core::error::ArenaError;
use crate::models::{Cat, RatingChange, RatingDelta, RatingOutcome};
use crate::services::{RatingStore, StoreError};

/// Default sensitivity of a single result
pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// Probability that a cat rated `rating` beats one rated `opponent`
#[inline]
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    let diff = f64::from(opponent) - f64::from(rating);
    1.0 / (1.0 + 10f64.powf(diff / 400.0))
}

/// Zero-sum Elo update for a decisive result; returns (new winner, new loser)
///
/// ```text
/// new_winner = round(winner + K * (1 - E(winner, loser)))
/// new_loser  = round(loser  + K * (0 - E(loser, winner)))
/// ```
pub fn elo_update(winner: i32, loser: i32, k_factor: f64) -> (i32, i32) {
    let expected_win = expected_score(winner, loser);
    let expected_lose = expected_score(loser, winner);

    let new_winner = (f64::from(winner) + k_factor * (1.0 - expected_win)).round() as i32;
    let new_loser = (f64::from(loser) + k_factor * (0.0 - expected_lose)).round() as i32;

    (new_winner, new_loser)
}

/// Order cats for the public ranking: highest rating first, then fewer matches, then id
pub fn sort_ranking(cats: &mut [Cat]) {
    cats.sort_by(|a, b| {
        b.rating
            .cmp(&a.rating)
            .then_with(|| a.match_count.cmp(&b.match_count))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Ratings computed for a vote but not yet written
#[derive(Debug, Clone)]
pub struct PendingResult {
    pub winner: Cat,
    pub loser: Cat,
    pub new_winner_rating: i32,
    pub new_loser_rating: i32,
}

/// Applies vote results to the rating store
#[derive(Clone)]
pub struct RatingEngine {
    store: Arc<dyn RatingStore>,
    k_factor: f64,
}

impl RatingEngine {
    pub fn new(store: Arc<dyn RatingStore>, k_factor: f64) -> Self {
        Self { store, k_factor }
    }

    pub fn k_factor(&self) -> f64 {
        self.k_factor
    }

    /// Resolve both cats and compute their new ratings without writing anything
    pub async fn prepare(&self, winner_id: &str, loser_id: &str) -> Result<PendingResult, ArenaError> {
        if winner_id == loser_id {
            return Err(ArenaError::InvalidVote("winner and loser must differ".into()));
        }

        let (winner, loser) = tokio::try_join!(self.store.get(winner_id), self.store.get(loser_id))?;
        let winner = winner.ok_or_else(|| ArenaError::ItemNotFound(winner_id.to_string()))?;
        let loser = loser.ok_or_else(|| ArenaError::ItemNotFound(loser_id.to_string()))?;

        let (new_winner_rating, new_loser_rating) = elo_update(winner.rating, loser.rating, self.k_factor);

        Ok(PendingResult {
            winner,
            loser,
            new_winner_rating,
            new_loser_rating,
        })
    }

    /// Write both rating changes as one unit; neither lands if either fails
    ///
    /// Changes are applied as deltas against the stored rating, so votes on
    /// overlapping cats that were prepared concurrently all count.
    pub async fn commit(&self, result: PendingResult) -> Result<RatingOutcome, ArenaError> {
        let winner_change = RatingChange::new(&result.winner.id, result.new_winner_rating - result.winner.rating);
        let loser_change = RatingChange::new(&result.loser.id, result.new_loser_rating - result.loser.rating);

        let (winner, loser) = self
            .store
            .apply_pair(&winner_change, &loser_change)
            .await
            .map_err(not_found_as_missing_item)?;

        let winner_delta = RatingDelta {
            before: winner.rating - winner_change.delta,
            after: winner.rating,
        };
        let loser_delta = RatingDelta {
            before: loser.rating - loser_change.delta,
            after: loser.rating,
        };

        tracing::info!(
            "Rated {} {} -> {} over {} {} -> {}",
            winner.id,
            winner_delta.before,
            winner_delta.after,
            loser.id,
            loser_delta.before,
            loser_delta.after
        );

        Ok(RatingOutcome {
            winner_id: winner.id,
            loser_id: loser.id,
            winner: winner_delta,
            loser: loser_delta,
        })
    }

    /// Apply a decisive vote: update both ratings and bump both match counts
    ///
    /// Fails with [`ArenaError::ItemNotFound`] before any write if either cat
    /// is missing.
    pub async fn apply_result(&self, winner_id: &str, loser_id: &str) -> Result<RatingOutcome, ArenaError> {
        let result = self.prepare(winner_id, loser_id).await?;
        self.commit(result).await
    }
}

fn not_found_as_missing_item(err: StoreError) -> ArenaError {
    match err {
        StoreError::NotFound(id) => {
            tracing::error!("Cat {} disappeared while applying a vote", id);
            ArenaError::ItemNotFound(id)
        }
        other => ArenaError::Store(other),
    }
}
