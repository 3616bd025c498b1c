//! Capability tokens scoping a single action to a voter
//!
//! Tokens are HS256 JWTs. The claims carry the voter identity (`sub`), a typed
//! grant (action kind plus its parameters), and an absolute expiry. Every
//! issuance gets a fresh `jti`, so a refreshed token is always a new value.

use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::models::Matchup;

/// Minimum accepted signing secret length in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// Errors raised while issuing or verifying capability tokens
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Signing secret must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,

    #[error("Failed to sign token: {0}")]
    Signing(String),

    #[error("System time error: {0}")]
    Clock(#[from] std::time::SystemTimeError),
}

/// Parameters of a `choose` capability: the two cats the voter may pick between
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChooseParams {
    #[serde(rename = "cat1Id")]
    pub cat1_id: String,
    #[serde(rename = "cat2Id")]
    pub cat2_id: String,
}

impl From<&Matchup> for ChooseParams {
    fn from(matchup: &Matchup) -> Self {
        Self {
            cat1_id: matchup.cat1_id.clone(),
            cat2_id: matchup.cat2_id.clone(),
        }
    }
}

impl From<ChooseParams> for Matchup {
    fn from(params: ChooseParams) -> Self {
        Matchup::new(params.cat1_id, params.cat2_id)
    }
}

/// Action kind with its typed parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "lowercase")]
pub enum Grant {
    Choose(ChooseParams),
}

impl Grant {
    pub fn choose(matchup: &Matchup) -> Self {
        Grant::Choose(ChooseParams::from(matchup))
    }
}

/// Payload carried by a capability token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityClaims {
    /// Voter identity
    pub sub: String,
    pub grant: Grant,
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
}

/// Issues and verifies signed, time-limited, single-action capabilities
pub trait CapabilityIssuer: Send + Sync {
    fn issue(&self, voter_id: &str, grant: Grant, ttl: Duration) -> Result<String, TokenError>;

    fn verify(&self, token: &str) -> Result<CapabilityClaims, TokenError>;
}

/// HS256 JWT capability issuer
#[derive(Clone)]
pub struct JwtCapabilityIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    leeway_secs: u64,
}

impl JwtCapabilityIssuer {
    /// Create a new issuer
    ///
    /// Returns an error if the secret is shorter than [`MIN_SECRET_LEN`].
    pub fn new(secret: &str, leeway_secs: u64) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::WeakSecret);
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            leeway_secs,
        })
    }

    /// Issue a token with an explicit absolute expiry (Unix seconds)
    pub fn issue_expiring_at(&self, voter_id: &str, grant: Grant, exp: u64) -> Result<String, TokenError> {
        let claims = CapabilityClaims {
            sub: voter_id.to_string(),
            grant,
            jti: uuid::Uuid::new_v4().to_string(),
            iat: unix_now()?,
            exp,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

impl CapabilityIssuer for JwtCapabilityIssuer {
    fn issue(&self, voter_id: &str, grant: Grant, ttl: Duration) -> Result<String, TokenError> {
        let exp = unix_now()? + ttl.as_secs();
        self.issue_expiring_at(voter_id, grant, exp)
    }

    fn verify(&self, token: &str) -> Result<CapabilityClaims, TokenError> {
        let mut validation = Validation::default();
        validation.leeway = self.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);

        match decode::<CapabilityClaims>(token, &self.decoding, &validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => match err.kind() {
                ErrorKind::ExpiredSignature => Err(TokenError::Expired),
                ErrorKind::InvalidSignature => Err(TokenError::Invalid("bad signature".into())),
                _ => Err(TokenError::Invalid(err.to_string())),
            },
        }
    }
}

fn unix_now() -> Result<u64, TokenError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
