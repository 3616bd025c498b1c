use serde::{Deserialize, Serialize};
use std::fmt;

/// Default rating for newly added cats
pub const DEFAULT_RATING: i32 = 1000;

/// A rated, votable cat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cat {
    pub id: String,
    pub name: String,
    #[serde(rename = "url")]
    pub image_url: String,
    pub rating: i32,
    #[serde(rename = "matchCount")]
    pub match_count: u32,
}

impl Cat {
    pub fn new(id: impl Into<String>, name: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image_url: image_url.into(),
            rating: DEFAULT_RATING,
            match_count: 0,
        }
    }

    /// Builder-style helper used heavily by tests and seeding
    pub fn with_stats(mut self, rating: i32, match_count: u32) -> Self {
        self.rating = rating;
        self.match_count = match_count;
        self
    }
}

/// A cat to be added to the catalogue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCat {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub url: String,
}

impl NewCat {
    /// Materialize into a stored cat with a fresh identifier when none was given
    pub fn into_cat(self, initial_rating: i32) -> Cat {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Cat::new(id, self.name, self.url).with_stats(initial_rating, 0)
    }
}

/// The two cats offered to a voter, in display order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Matchup {
    #[serde(rename = "cat1Id")]
    pub cat1_id: String,
    #[serde(rename = "cat2Id")]
    pub cat2_id: String,
}

impl Matchup {
    pub fn new(cat1_id: impl Into<String>, cat2_id: impl Into<String>) -> Self {
        Self {
            cat1_id: cat1_id.into(),
            cat2_id: cat2_id.into(),
        }
    }

    pub fn contains(&self, cat_id: &str) -> bool {
        self.cat1_id == cat_id || self.cat2_id == cat_id
    }

    pub fn canonical(&self) -> UnorderedPair {
        UnorderedPair::new(&self.cat1_id, &self.cat2_id)
    }
}

/// Order-independent pair of cat identifiers (`low <= high`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnorderedPair {
    pub low: String,
    pub high: String,
}

impl UnorderedPair {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }
}

/// Canonical idempotency key: one vote per voter per unordered pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub voter_id: String,
    pub pair: UnorderedPair,
}

impl PairKey {
    pub fn new(voter_id: &str, cat_a: &str, cat_b: &str) -> Self {
        Self {
            voter_id: voter_id.to_string(),
            pair: UnorderedPair::new(cat_a, cat_b),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.voter_id, self.pair.low, self.pair.high)
    }
}

/// In-flight pairing offered to a voter, with the capability currently valid for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMatch {
    pub voter_id: String,
    pub matchup: Matchup,
    pub token: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Resolved vote, never overwritten once recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub key: PairKey,
    pub winner_id: String,
    pub loser_id: String,
    pub voted_at: chrono::DateTime<chrono::Utc>,
}

impl VoteRecord {
    pub fn new(voter_id: &str, winner_id: &str, loser_id: &str) -> Self {
        Self {
            key: PairKey::new(voter_id, winner_id, loser_id),
            winner_id: winner_id.to_string(),
            loser_id: loser_id.to_string(),
            voted_at: chrono::Utc::now(),
        }
    }
}

/// Rating adjustment for one side of a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingChange {
    pub cat_id: String,
    pub delta: i32,
}

impl RatingChange {
    pub fn new(cat_id: impl Into<String>, delta: i32) -> Self {
        Self {
            cat_id: cat_id.into(),
            delta,
        }
    }
}

/// Rating change for one cat after a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingDelta {
    pub before: i32,
    pub after: i32,
}

/// Result of applying a decisive vote between two cats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingOutcome {
    #[serde(rename = "winnerId")]
    pub winner_id: String,
    #[serde(rename = "loserId")]
    pub loser_id: String,
    pub winner: RatingDelta,
    pub loser: RatingDelta,
}
