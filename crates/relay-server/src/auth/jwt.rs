//! JWT token generation and validation.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Claims carried by a Relay-issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: i64,
    /// Display name at issuance time.
    pub name: String,
    /// Issued at.
    pub iat: i64,
    /// Expiration.
    pub exp: i64,
}

/// JWT manager for token operations.
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expiry_hours: i64,
}

impl JwtManager {
    /// Create a new JWT manager.
    #[must_use]
    pub fn new(secret: &str, token_expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_expiry_hours,
        }
    }

    /// Generate a token for `user_id` / `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn generate_token(&self, user_id: i64, name: &str) -> Result<String, JwtError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + Duration::hours(self.token_expiry_hours);

        let claims = Claims {
            sub: user_id,
            name: name.to_string(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
        };

        // Explicit algorithm prevents algorithm confusion attacks.
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Validate and decode a token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is expired, malformed, or not signed
    /// with this manager's key.
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // clock skew tolerance

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            })
    }

    /// Token lifetime in seconds, for cookie Max-Age.
    #[must_use]
    pub fn token_expiry_seconds(&self) -> i64 {
        self.token_expiry_hours * 3600
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("token has expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("token encoding failed: {0}")]
    Encoding(String),
    #[error("token validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_generation_and_validation() {
        let jwt = JwtManager::new("test-secret-key-at-least-32-chars!", 24);

        let token = jwt.generate_token(7, "alice").expect("failed to generate token");
        let claims = jwt.validate_token(&token).expect("invalid token");

        assert_eq!(claims.sub, 7);
        assert_eq!(claims.name, "alice");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = JwtManager::new("secret-one-secret-one-secret-one!", 24);
        let verifier = JwtManager::new("secret-two-secret-two-secret-two!", 24);

        let token = issuer.generate_token(1, "bob").expect("failed to generate token");
        assert!(verifier.validate_token(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let jwt = JwtManager::new("test-secret-key-at-least-32-chars!", 24);
        assert!(jwt.validate_token("not.a.token").is_err());
    }
}
