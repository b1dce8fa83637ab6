//! Session token verification
//!
//! The portal's login service signs HS256 session tokens with a shared
//! secret. This side only needs to check them and recover the [`Actor`];
//! [`JwtManager::issue`] exists for local tooling and tests.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use supportdesk_shared::{Actor, Role, UserId};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Tolerated clock drift between the login service and this one
const CLOCK_SKEW_SECS: u64 = 60;

/// Claims carried by a portal session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: UserId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
    /// Session id, when the issuer tracks sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl SessionClaims {
    pub fn actor(&self) -> Actor {
        Actor::new(self.sub, self.role)
    }
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtManager {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_SECS;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    /// Sign a session token for `actor`
    pub fn issue(&self, actor: Actor, email: Option<&str>) -> Result<String, JwtError> {
        let now = OffsetDateTime::now_utc();
        let claims = SessionClaims {
            sub: actor.user_id,
            role: actor.role,
            email: email.map(str::to_string),
            iat: now.unix_timestamp(),
            exp: (now + self.ttl).unix_timestamp(),
            jti: Some(Uuid::new_v4().to_string()),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Check signature, algorithm and expiry, then decode the claims
    pub fn verify(&self, token: &str) -> Result<SessionClaims, JwtError> {
        decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                ErrorKind::InvalidToken | ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    JwtError::Invalid
                }
                // Unknown roles and malformed subjects land here
                ErrorKind::Json(_) => JwtError::MalformedClaims(e.to_string()),
                _ => JwtError::Validation(e.to_string()),
            })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token claims are malformed: {0}")]
    MalformedClaims(String),
    #[error("Token encoding failed: {0}")]
    Encoding(String),
    #[error("Token validation failed: {0}")]
    Validation(String),
}
