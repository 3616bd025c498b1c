use serde::{Deserialize, Serialize};
use crate::models::domain::{Cat, RatingOutcome};

/// Response for the match endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub cats: Vec<Cat>,
    pub token: String,
    pub resumed: bool,
}

/// Response for an accepted vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub success: bool,
    pub outcome: RatingOutcome,
}

/// Response for the ranking endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingResponse {
    pub cats: Vec<Cat>,
    pub total: usize,
}

/// Response for the total-votes endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalVotesResponse {
    #[serde(rename = "totalVotes")]
    pub total_votes: u64,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}
