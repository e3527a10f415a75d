use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;

/// Uniform failure type for all token verification paths; callers map it to
/// 401 (or 400 on the refresh endpoint).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Token has expired.")]
    TokenExpired,

    #[error("Invalid token.")]
    InvalidToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub exp: i64,
}

/// Signs and verifies access/refresh JWTs. The two kinds use independent
/// secrets and lifetimes.
#[derive(Clone)]
pub struct JwtManager {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtManager {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_ttl: Duration::minutes(config.access_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_ttl_days),
        }
    }

    pub fn create_access_token(&self, user_id: Uuid) -> Result<String, SecurityError> {
        self.create_token(user_id, TokenKind::Access)
    }

    pub fn create_refresh_token(&self, user_id: Uuid) -> Result<String, SecurityError> {
        self.create_token(user_id, TokenKind::Refresh)
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn create_token(&self, user_id: Uuid, kind: TokenKind) -> Result<String, SecurityError> {
        let (key, ttl) = match kind {
            TokenKind::Access => (&self.access_encoding, self.access_ttl),
            TokenKind::Refresh => (&self.refresh_encoding, self.refresh_ttl),
        };
        let claims = Claims {
            user_id,
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, key)
            .map_err(|_| SecurityError::InvalidToken)
    }

    /// Verify signature and expiry. A token with `exp <= now` is expired:
    /// the library treats `exp == now` as still valid, so the boundary is
    /// checked explicitly here.
    pub fn decode(&self, token: &str, kind: TokenKind) -> Result<Claims, SecurityError> {
        let key = match kind {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<Claims>(token, key, &validation).map_err(|err| {
            match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => SecurityError::TokenExpired,
                _ => SecurityError::InvalidToken,
            }
        })?;

        if data.claims.exp <= Utc::now().timestamp() {
            return Err(SecurityError::TokenExpired);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;

    fn manager() -> JwtManager {
        JwtManager::new(&JwtConfig {
            access_secret: "access-secret".into(),
            refresh_secret: "refresh-secret".into(),
            access_ttl_minutes: 30,
            refresh_ttl_days: 7,
        })
    }

    fn token_with_exp(exp: i64) -> String {
        let claims = Claims {
            user_id: Uuid::new_v4(),
            exp,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret("access-secret".as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn round_trips_access_token() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let token = manager.create_access_token(user_id).unwrap();
        let claims = manager.decode(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.user_id, user_id);
    }

    #[test]
    fn access_token_rejected_as_refresh() {
        let manager = manager();
        let token = manager.create_access_token(Uuid::new_v4()).unwrap();
        assert_eq!(
            manager.decode(&token, TokenKind::Refresh),
            Err(SecurityError::InvalidToken)
        );
    }

    #[test]
    fn exp_equal_to_now_is_expired() {
        let manager = manager();
        let token = token_with_exp(Utc::now().timestamp());
        assert_eq!(
            manager.decode(&token, TokenKind::Access),
            Err(SecurityError::TokenExpired)
        );
    }

    #[test]
    fn exp_in_the_past_is_expired() {
        let manager = manager();
        let token = token_with_exp(Utc::now().timestamp() - 60);
        assert_eq!(
            manager.decode(&token, TokenKind::Access),
            Err(SecurityError::TokenExpired)
        );
    }

    #[test]
    fn exp_one_second_ahead_decodes() {
        let manager = manager();
        let token = token_with_exp(Utc::now().timestamp() + 1);
        assert!(manager.decode(&token, TokenKind::Access).is_ok());
    }

    #[test]
    fn garbage_is_invalid() {
        let manager = manager();
        assert_eq!(
            manager.decode("not-a-token", TokenKind::Access),
            Err(SecurityError::InvalidToken)
        );
    }
}
