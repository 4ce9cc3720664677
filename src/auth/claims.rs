/// Access token claims
///
/// Timestamps are Unix milliseconds so that sub-second lifetimes are
/// honoured exactly.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AuthError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Owning user id, when the token was minted for a stored principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    /// Issued at (Unix ms)
    pub iat: i64,
    /// Expiration time (Unix ms)
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    /// Create claims for `subject` that expire `ttl` from now
    pub fn new(subject: &str, user_id: Option<Uuid>, ttl: Duration, issuer: &str) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            sub: subject.to_string(),
            uid: user_id,
            iat: now,
            exp: now.saturating_add(ttl.num_milliseconds()),
            iss: issuer.to_string(),
        }
    }

    /// Extract the user id claim
    ///
    /// # Errors
    /// Returns `TokenInvalid` if the token carries no user id
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        self.uid.ok_or(AppError::Auth(AuthError::TokenInvalid))
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.exp < now_ms
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_creation() {
        let user_id = Uuid::new_v4();
        let claims = Claims::new("alice", Some(user_id), Duration::hours(1), "test");

        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.uid, Some(user_id));
        assert_eq!(claims.iss, "test");
        assert_eq!(claims.exp - claims.iat, 3_600_000);
        assert!(!claims.is_expired());
    }

    #[test]
    fn test_user_id_extraction() {
        let user_id = Uuid::new_v4();
        let claims = Claims::new("alice", Some(user_id), Duration::hours(1), "test");

        assert_eq!(claims.user_id().unwrap(), user_id);
    }

    #[test]
    fn test_missing_user_id() {
        let claims = Claims::new("service", None, Duration::hours(1), "test");

        assert!(claims.user_id().is_err());
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("uid").is_none());
    }

    #[test]
    fn test_negative_ttl_is_already_expired() {
        let claims = Claims::new("alice", None, Duration::milliseconds(-1), "test");

        assert!(claims.is_expired_at(claims.iat));
    }
}
