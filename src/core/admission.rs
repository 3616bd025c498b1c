use std::sync::Arc;

use crate::core::error::ArenaError;
use crate::core::rating::RatingEngine;
use crate::core::session::MatchSession;
use crate::models::{Matchup, PairKey, RatingOutcome, VoteRecord};
use crate::services::{CapabilityIssuer, Grant, VoteCounter, VoteLedger};

/// Accepted vote, with the voter it was attributed to
#[derive(Debug, Clone)]
pub struct AcceptedVote {
    pub voter_id: String,
    pub outcome: RatingOutcome,
}

/// Authorization and idempotency gate in front of the rating engine
///
/// # Pipeline Stages
/// 1. Verify the capability token
/// 2. Check the claimed winner/loser against the pair bound in the token
/// 3. Reject pairs this voter already resolved
/// 4. Resolve both cats, claim the ledger slot, then write ratings, clear
///    the pending match and bump the vote counter
///
/// Nothing is written before stage 4; the ledger claim is an atomic
/// create-if-absent, so two racing votes on one pair cannot both pass.
/// Both ratings are written as one unit. If that write fails the claim is
/// released again.
#[derive(Clone)]
pub struct VoteAdmission {
    issuer: Arc<dyn CapabilityIssuer>,
    ledger: Arc<dyn VoteLedger>,
    counter: Arc<dyn VoteCounter>,
    engine: RatingEngine,
    session: MatchSession,
}

impl VoteAdmission {
    pub fn new(
        issuer: Arc<dyn CapabilityIssuer>,
        ledger: Arc<dyn VoteLedger>,
        counter: Arc<dyn VoteCounter>,
        engine: RatingEngine,
        session: MatchSession,
    ) -> Self {
        Self {
            issuer,
            ledger,
            counter,
            engine,
            session,
        }
    }

    pub async fn admit_vote(
        &self,
        token: &str,
        winner_id: &str,
        loser_id: &str,
    ) -> Result<AcceptedVote, ArenaError> {
        let claims = self.issuer.verify(token).map_err(|e| {
            tracing::debug!("Rejected vote token: {}", e);
            ArenaError::InvalidOrExpiredToken
        })?;

        let matchup = match claims.grant {
            Grant::Choose(params) => Matchup::from(params),
        };
        check_binding(&matchup, winner_id, loser_id)?;

        let voter_id = claims.sub;
        let key = PairKey::new(&voter_id, &matchup.cat1_id, &matchup.cat2_id);
        if self.ledger.exists(&key).await? {
            return Err(ArenaError::DuplicateVote);
        }

        let pending = self.engine.prepare(winner_id, loser_id).await?;

        if !self.ledger.record(&VoteRecord::new(&voter_id, winner_id, loser_id)).await? {
            tracing::info!("Concurrent duplicate vote from {} on {}", voter_id, key);
            return Err(ArenaError::DuplicateVote);
        }

        let outcome = match self.engine.commit(pending).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Ratings are untouched, so the voter may retry this pair
                if let Err(release_err) = self.ledger.release(&key).await {
                    tracing::error!("Failed to release vote claim {} after {}: {}", key, e, release_err);
                }
                return Err(e);
            }
        };

        // The vote is applied from here on; later failures are logged, not returned
        if let Err(e) = self.session.clear(&voter_id).await {
            tracing::error!("Failed to clear pending match for {}: {}", voter_id, e);
        }
        if let Err(e) = self.counter.increment().await {
            tracing::error!("Failed to bump vote counter: {}", e);
        }

        tracing::info!("Vote accepted from {}: {} beat {}", voter_id, winner_id, loser_id);

        Ok(AcceptedVote { voter_id, outcome })
    }
}

fn check_binding(matchup: &Matchup, winner_id: &str, loser_id: &str) -> Result<(), ArenaError> {
    if winner_id == loser_id {
        return Err(ArenaError::InvalidVote("winner and loser must differ".into()));
    }
    if !matchup.contains(winner_id) || !matchup.contains(loser_id) {
        return Err(ArenaError::InvalidVote("cats do not match the authorized pair".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rating::DEFAULT_K_FACTOR;
    use crate::models::{Cat, RatingChange};
    use crate::services::{
        InMemoryStore, JwtCapabilityIssuer, PendingMatchStore, PostgresError, RatingStore, StoreError,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const SECRET: &str = "admission-test-secret-long-enough-hs256";

    struct Fixture {
        store: Arc<InMemoryStore>,
        issuer: Arc<JwtCapabilityIssuer>,
        session: MatchSession,
        admission: VoteAdmission,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::with_cats([
            Cat::new("a", "A", "https://x/a"),
            Cat::new("b", "B", "https://x/b"),
            Cat::new("c", "C", "https://x/c").with_stats(1400, 0),
        ]));
        fixture_over(store.clone(), store)
    }

    fn fixture_over(store: Arc<InMemoryStore>, ratings: Arc<dyn RatingStore>) -> Fixture {
        let issuer = Arc::new(JwtCapabilityIssuer::new(SECRET, 0).unwrap());
        let session = MatchSession::new(
            ratings.clone(),
            store.clone(),
            store.clone(),
            issuer.clone(),
            Duration::from_secs(300),
        );
        let engine = RatingEngine::new(ratings, DEFAULT_K_FACTOR);
        let admission = VoteAdmission::new(
            issuer.clone(),
            store.clone(),
            store.clone(),
            engine,
            session.clone(),
        );
        Fixture {
            store,
            issuer,
            session,
            admission,
        }
    }

    /// Rating store that can yield after reads and fail pair writes on demand
    struct Harness {
        inner: Arc<InMemoryStore>,
        yield_after_get: bool,
        fail_writes: AtomicBool,
    }

    impl Harness {
        fn over(inner: Arc<InMemoryStore>, yield_after_get: bool) -> Arc<Self> {
            Arc::new(Self {
                inner,
                yield_after_get,
                fail_writes: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl RatingStore for Harness {
        async fn list_all(&self) -> Result<Vec<Cat>, StoreError> {
            self.inner.list_all().await
        }

        async fn get(&self, cat_id: &str) -> Result<Option<Cat>, StoreError> {
            let cat = RatingStore::get(self.inner.as_ref(), cat_id).await?;
            if self.yield_after_get {
                tokio::task::yield_now().await;
            }
            Ok(cat)
        }

        async fn apply_delta(&self, cat_id: &str, delta: i32) -> Result<Cat, StoreError> {
            self.inner.apply_delta(cat_id, delta).await
        }

        async fn apply_pair(&self, winner: &RatingChange, loser: &RatingChange) -> Result<(Cat, Cat), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(PostgresError::SqlxError(sqlx::Error::PoolTimedOut).into());
            }
            self.inner.apply_pair(winner, loser).await
        }

        async fn insert_if_absent(&self, cat: Cat) -> Result<bool, StoreError> {
            self.inner.insert_if_absent(cat).await
        }
    }

    async fn rating_of(store: &InMemoryStore, id: &str) -> (i32, u32) {
        let cat = RatingStore::get(store, id).await.unwrap().unwrap();
        (cat.rating, cat.match_count)
    }

    #[tokio::test]
    async fn test_accepted_vote_updates_everything() {
        let f = fixture();
        let offer = f.session.get_or_create("v1").await.unwrap();
        let (winner, loser) = (offer.cats[0].id.clone(), offer.cats[1].id.clone());

        let accepted = f.admission.admit_vote(&offer.token, &winner, &loser).await.unwrap();

        assert_eq!(accepted.voter_id, "v1");
        assert_eq!(accepted.outcome.winner.after, 1016);
        assert_eq!(rating_of(&f.store, &winner).await, (1016, 1));
        assert_eq!(rating_of(&f.store, &loser).await, (984, 1));
        assert!(PendingMatchStore::get(f.store.as_ref(), "v1").await.unwrap().is_none());
        assert_eq!(f.store.read().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_vote_in_either_order() {
        let f = fixture();
        let offer = f.session.get_or_create("v1").await.unwrap();
        let (x, y) = (offer.cats[0].id.clone(), offer.cats[1].id.clone());

        f.admission.admit_vote(&offer.token, &x, &y).await.unwrap();
        let after_first = (rating_of(&f.store, &x).await, rating_of(&f.store, &y).await);

        for (winner, loser) in [(&x, &y), (&y, &x)] {
            let result = f.admission.admit_vote(&offer.token, winner, loser).await;
            assert!(matches!(result, Err(ArenaError::DuplicateVote)));
        }

        assert_eq!((rating_of(&f.store, &x).await, rating_of(&f.store, &y).await), after_first);
        assert_eq!(f.store.read().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_votes_admit_once() {
        let f = fixture();
        let offer = f.session.get_or_create("v1").await.unwrap();
        let (x, y) = (offer.cats[0].id.clone(), offer.cats[1].id.clone());

        let (first, second) = tokio::join!(
            f.admission.admit_vote(&offer.token, &x, &y),
            f.admission.admit_vote(&offer.token, &y, &x),
        );

        assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(f.store.vote_count(), 1);
        assert_eq!(rating_of(&f.store, &x).await.1, 1);
    }

    #[tokio::test]
    async fn test_overlapping_votes_from_two_voters_both_count() {
        let store = Arc::new(InMemoryStore::with_cats([
            Cat::new("a", "A", "https://x/a"),
            Cat::new("b", "B", "https://x/b"),
        ]));
        let f = fixture_over(store.clone(), Harness::over(store, true));
        let grant = Grant::choose(&Matchup::new("a", "b"));
        let first = f.issuer.issue("v1", grant.clone(), Duration::from_secs(60)).unwrap();
        let second = f.issuer.issue("v2", grant, Duration::from_secs(60)).unwrap();

        // Both votes read a and b at 1000 before either writes
        let (r1, r2) = tokio::join!(
            f.admission.admit_vote(&first, "a", "b"),
            f.admission.admit_vote(&second, "a", "b"),
        );
        r1.unwrap();
        r2.unwrap();

        assert_eq!(rating_of(&f.store, "a").await, (1032, 2));
        assert_eq!(rating_of(&f.store, "b").await, (968, 2));
        assert_eq!(f.store.vote_count(), 2);
        assert_eq!(f.store.read().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_rating_write_releases_claim() {
        let store = Arc::new(InMemoryStore::with_cats([
            Cat::new("a", "A", "https://x/a"),
            Cat::new("b", "B", "https://x/b"),
        ]));
        let harness = Harness::over(store.clone(), false);
        let f = fixture_over(store, harness.clone());
        let token = f
            .issuer
            .issue("v1", Grant::choose(&Matchup::new("a", "b")), Duration::from_secs(60))
            .unwrap();

        harness.fail_writes.store(true, Ordering::SeqCst);
        let result = f.admission.admit_vote(&token, "a", "b").await;
        assert!(matches!(result, Err(ArenaError::Store(_))));
        assert_eq!(rating_of(&f.store, "a").await, (1000, 0));
        assert_eq!(rating_of(&f.store, "b").await, (1000, 0));
        assert_eq!(f.store.vote_count(), 0);
        assert_eq!(f.store.read().await.unwrap(), 0);

        // Once the store recovers the same vote goes through
        harness.fail_writes.store(false, Ordering::SeqCst);
        let accepted = f.admission.admit_vote(&token, "a", "b").await.unwrap();
        assert_eq!(accepted.outcome.winner.after, 1016);
        assert_eq!(rating_of(&f.store, "a").await, (1016, 1));
        assert_eq!(f.store.vote_count(), 1);
    }

    #[tokio::test]
    async fn test_claims_outside_token_binding() {
        let f = fixture();
        let token = f
            .issuer
            .issue("v1", Grant::choose(&Matchup::new("a", "b")), Duration::from_secs(60))
            .unwrap();

        for (winner, loser) in [("a", "c"), ("c", "b"), ("a", "a")] {
            let result = f.admission.admit_vote(&token, winner, loser).await;
            assert!(matches!(result, Err(ArenaError::InvalidVote(_))));
        }
        assert_eq!(rating_of(&f.store, "a").await, (1000, 0));
    }

    #[tokio::test]
    async fn test_expired_or_forged_token() {
        let f = fixture();
        let expired = f
            .issuer
            .issue_expiring_at("v1", Grant::choose(&Matchup::new("a", "b")), 1)
            .unwrap();

        for token in [expired.as_str(), "not-a-token"] {
            let result = f.admission.admit_vote(token, "a", "b").await;
            assert!(matches!(result, Err(ArenaError::InvalidOrExpiredToken)));
        }
        assert_eq!(f.store.vote_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_cat_writes_nothing() {
        let f = fixture();
        let token = f
            .issuer
            .issue("v1", Grant::choose(&Matchup::new("a", "ghost")), Duration::from_secs(60))
            .unwrap();

        let result = f.admission.admit_vote(&token, "a", "ghost").await;
        assert!(matches!(result, Err(ArenaError::ItemNotFound(id)) if id == "ghost"));
        assert_eq!(f.store.vote_count(), 0);
        assert_eq!(rating_of(&f.store, "a").await, (1000, 0));
    }
}
