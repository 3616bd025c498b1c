// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{Cat, NewCat, Matchup, UnorderedPair, PairKey, PendingMatch, VoteRecord, RatingChange, RatingDelta, RatingOutcome, DEFAULT_RATING};
pub use requests::{VoteRequest, CreateCatRequest};
pub use responses::{MatchResponse, VoteResponse, RankingResponse, TotalVotesResponse, HealthResponse, ErrorResponse};
