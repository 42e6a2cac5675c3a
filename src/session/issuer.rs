use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::errors::SessionError;

/// Converts a verified identity into an opaque bearer token.
///
/// The engine calls this after a successful ceremony. Tokens reference only
/// the `(user_id, username)` pair; no credential material is ever embedded.
/// Token transport (cookie attributes, headers) is the caller's concern.
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    async fn issue(&self, user_id: &str, username: &str) -> Result<String, SessionError>;
}

/// Claims carried by tokens from [`JwtSessionIssuer`].
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionClaims {
    /// User id
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 JWT session issuer with a fixed lifetime.
pub struct JwtSessionIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
}

impl JwtSessionIssuer {
    /// Default session lifetime, 7 days.
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(60 * 60 * 24 * 7);

    pub fn new(secret: &[u8]) -> Self {
        Self::with_lifetime(secret, Self::DEFAULT_LIFETIME)
    }

    pub fn with_lifetime(secret: &[u8], lifetime: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            lifetime,
        }
    }

    /// Decode and validate a token previously issued by this issuer.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| SessionError::InvalidToken(e.to_string()))?;
        Ok(data.claims)
    }
}

#[async_trait]
impl SessionIssuer for JwtSessionIssuer {
    async fn issue(&self, user_id: &str, username: &str) -> Result<String, SessionError> {
        let now = chrono::Utc::now().timestamp();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            username: username.to_string(),
            iat: now,
            exp: now + self.lifetime.as_secs() as i64,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| SessionError::TokenCreation(e.to_string()))
    }
}
