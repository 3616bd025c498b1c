use std::sync::Arc;
use std::time::Duration;

use crate::core::error::ArenaError;
use crate::core::pairing::select_unseen_pair;
use crate::models::{Cat, Matchup, PairKey, PendingMatch};
use crate::services::{CapabilityIssuer, Grant, PendingMatchStore, RatingStore, VoteLedger};

/// A pair offered to a voter along with the capability to vote on it
#[derive(Debug, Clone)]
pub struct MatchOffer {
    pub cats: [Cat; 2],
    pub token: String,
    /// True when an existing pending match was returned instead of a new pair
    pub resumed: bool,
}

/// Pending-match session: at most one in-flight pair per voter
///
/// Repeated reads return the same pair until a vote clears it. An expired
/// capability is replaced by a fresh one for the same pair. New matches are
/// stored with create-if-absent, so concurrent first reads by one voter
/// converge on a single pair.
#[derive(Clone)]
pub struct MatchSession {
    ratings: Arc<dyn RatingStore>,
    ledger: Arc<dyn VoteLedger>,
    pending: Arc<dyn PendingMatchStore>,
    issuer: Arc<dyn CapabilityIssuer>,
    token_ttl: Duration,
}

impl MatchSession {
    pub fn new(
        ratings: Arc<dyn RatingStore>,
        ledger: Arc<dyn VoteLedger>,
        pending: Arc<dyn PendingMatchStore>,
        issuer: Arc<dyn CapabilityIssuer>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            ratings,
            ledger,
            pending,
            issuer,
            token_ttl,
        }
    }

    /// Return the voter's pending match, or create one
    pub async fn get_or_create(&self, voter_id: &str) -> Result<MatchOffer, ArenaError> {
        let cats = self.ratings.list_all().await?;

        if let Some(pending) = self.pending.get(voter_id).await? {
            if let Some(offer) = self.resume(voter_id, pending, &cats).await? {
                return Ok(offer);
            }
        }

        let resolved = self.ledger.resolved_pairs(voter_id).await?;
        let (first, second) = select_unseen_pair(&cats, &resolved)?.ok_or_else(|| {
            tracing::info!("Voter {} has resolved all {} pairs", voter_id, resolved.len());
            ArenaError::PairsExhausted
        })?;

        let matchup = Matchup::new(&first.id, &second.id);
        let token = self.mint(voter_id, &matchup)?;

        let pending = PendingMatch {
            voter_id: voter_id.to_string(),
            matchup,
            token: token.clone(),
            created_at: chrono::Utc::now(),
        };

        // A concurrent request for the same voter may have stored its pair first
        if !self.pending.set_if_absent(&pending).await? {
            if let Some(existing) = self.pending.get(voter_id).await? {
                if let Some(offer) = self.resume(voter_id, existing, &cats).await? {
                    tracing::debug!("Pending match for {} created concurrently; resuming it", voter_id);
                    return Ok(offer);
                }
            }
            self.pending.set(&pending).await?;
        }

        tracing::debug!("New match for {}: {} vs {}", voter_id, first.id, second.id);

        Ok(MatchOffer {
            cats: [first.clone(), second.clone()],
            token,
            resumed: false,
        })
    }

    /// Drop the voter's pending match
    pub async fn clear(&self, voter_id: &str) -> Result<(), ArenaError> {
        self.pending.delete(voter_id).await?;
        Ok(())
    }

    /// Re-offer a pending match, refreshing its token if it no longer verifies
    ///
    /// Returns `None` when the pending match is stale (a cat vanished or the
    /// pair was already voted) and has been discarded.
    async fn resume(
        &self,
        voter_id: &str,
        pending: PendingMatch,
        cats: &[Cat],
    ) -> Result<Option<MatchOffer>, ArenaError> {
        let find = |id: &str| cats.iter().find(|cat| cat.id == id);
        let matchup = &pending.matchup;

        let pair = match (find(&matchup.cat1_id), find(&matchup.cat2_id)) {
            (Some(a), Some(b)) => [a.clone(), b.clone()],
            _ => {
                tracing::warn!("Discarding pending match for {}: cat no longer exists", voter_id);
                self.pending.delete(voter_id).await?;
                return Ok(None);
            }
        };

        let key = PairKey::new(voter_id, &matchup.cat1_id, &matchup.cat2_id);
        if self.ledger.exists(&key).await? {
            tracing::warn!("Discarding pending match for {}: pair already voted", voter_id);
            self.pending.delete(voter_id).await?;
            return Ok(None);
        }

        let token = if self.token_still_valid(voter_id, &pending) {
            pending.token
        } else {
            let token = self.mint(voter_id, matchup)?;
            self.pending
                .set(&PendingMatch {
                    token: token.clone(),
                    ..pending.clone()
                })
                .await?;
            tracing::debug!("Refreshed action token for {}", voter_id);
            token
        };

        Ok(Some(MatchOffer {
            cats: pair,
            token,
            resumed: true,
        }))
    }

    // Verification failures only mean the token needs refreshing
    fn token_still_valid(&self, voter_id: &str, pending: &PendingMatch) -> bool {
        match self.issuer.verify(&pending.token) {
            Ok(claims) => claims.sub == voter_id && claims.grant == Grant::choose(&pending.matchup),
            Err(e) => {
                tracing::debug!("Pending token for {} failed verification: {}", voter_id, e);
                false
            }
        }
    }

    fn mint(&self, voter_id: &str, matchup: &Matchup) -> Result<String, ArenaError> {
        self.issuer
            .issue(voter_id, Grant::choose(matchup), self.token_ttl)
            .map_err(ArenaError::TokenIssue)
    }
}
