use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::domain::NewCat;

/// Request to vote on the current match
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VoteRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "action_token", rename = "actionToken")]
    pub action_token: String,
    #[validate(length(min = 1))]
    #[serde(alias = "winner_id", rename = "winnerId")]
    pub winner_id: String,
    #[validate(length(min = 1))]
    #[serde(alias = "loser_id", rename = "loserId")]
    pub loser_id: String,
}

/// Request to add a cat to the catalogue
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCatRequest {
    #[validate(length(min = 1, max = 128))]
    pub id: Option<String>,
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(url)]
    pub url: String,
}

impl From<CreateCatRequest> for NewCat {
    fn from(req: CreateCatRequest) -> Self {
        NewCat {
            id: req.id,
            name: req.name,
            url: req.url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_request_accepts_camel_case() {
        let req: VoteRequest = serde_json::from_str(
            r#"{"actionToken":"t","winnerId":"a","loserId":"b"}"#,
        )
        .unwrap();
        assert_eq!(req.winner_id, "a");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_create_cat_rejects_bad_url() {
        let req = CreateCatRequest {
            id: None,
            name: "Felix".to_string(),
            url: "not a url".to_string(),
        };
        assert!(req.validate().is_err());
    }
}
