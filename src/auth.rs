//! Password hashing and session tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("token signing failed: {0}")]
    Sign(jsonwebtoken::errors::Error),
}

/// Hashes and checks passwords with bcrypt.
#[derive(Clone, Copy, Debug)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        Ok(bcrypt::hash(password, self.cost)?)
    }

    /// A malformed stored hash counts as a mismatch.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies signed session tokens carrying the account identity.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, identity: &str) -> Result<String, AuthError> {
        self.issue_at(identity, Utc::now())
    }

    pub fn issue_at(&self, identity: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            sub: identity.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(AuthError::Sign)
    }

    /// Returns the identity the token was issued for.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims.sub)
            .map_err(|_| AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::{PasswordHasher, TokenIssuer};
    use chrono::{Duration, Utc};
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_password_roundtrip() {
        let hasher = PasswordHasher::new(4);
        let hash = assert_ok!(hasher.hash("hunter2"));
        assert_ne!("hunter2", hash);
        assert!(hasher.verify("hunter2", &hash));
        assert!(!hasher.verify("hunter3", &hash));
        assert!(!hasher.verify("hunter2", "not-a-hash"));
    }

    #[test]
    fn test_token_roundtrip() {
        let tokens = TokenIssuer::new("secret", Duration::days(7));
        let token = assert_ok!(tokens.issue("alice@example.com"));
        assert_eq!("alice@example.com", assert_ok!(tokens.verify(&token)));
    }

    #[test]
    fn test_token_signed_with_other_secret() {
        let ours = TokenIssuer::new("secret", Duration::days(7));
        let theirs = TokenIssuer::new("other", Duration::days(7));
        let token = assert_ok!(theirs.issue("alice@example.com"));
        assert_err!(ours.verify(&token));
        assert_err!(ours.verify("garbage"));
    }

    #[test]
    fn test_expired_token() {
        let tokens = TokenIssuer::new("secret", Duration::days(7));
        let token = assert_ok!(tokens.issue_at("alice@example.com", Utc::now() - Duration::days(8)));
        assert_err!(tokens.verify(&token));
    }
}
