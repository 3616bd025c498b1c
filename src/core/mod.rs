// Core engine exports
pub mod admission;
pub mod error;
pub mod pairing;
pub mod rating;
pub mod session;

pub use admission::{AcceptedVote, VoteAdmission};
pub use error::ArenaError;
pub use pairing::{select_pair, select_unseen_pair, sort_by_exposure};
pub use rating::{elo_update, expected_score, sort_ranking, RatingEngine, DEFAULT_K_FACTOR};
pub use session::{MatchOffer, MatchSession};
