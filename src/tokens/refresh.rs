/// Refresh Token Store
///
/// One active refresh token per user: issuing deletes every record the user
/// already holds before inserting the new one. Two logins racing for the same
/// user may both return a token; the loser is gone by the next issue.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AuthError};
use crate::tokens::{generate_token, hash_token};

/// Stored refresh token record
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}

/// A freshly issued token; `token` is the only copy of the plaintext
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Replace any token the user holds with a new one
    async fn issue(&self, user_id: Uuid) -> Result<IssuedRefreshToken, AppError>;

    /// Look up a record regardless of its state
    async fn find(&self, token: &str) -> Result<Option<RefreshToken>, AppError>;

    /// True iff the token exists, is not revoked and has not expired
    async fn validate(&self, token: &str) -> Result<bool, AppError> {
        let now = Utc::now();
        Ok(self
            .find(token)
            .await?
            .map_or(false, |record| record.is_active_at(now)))
    }

    /// Redeem `token` and issue its replacement for the same user.
    ///
    /// A token can be redeemed at most once; any later attempt fails with
    /// `InvalidRefreshToken`.
    async fn consume_and_rotate(&self, token: &str) -> Result<IssuedRefreshToken, AppError>;

    /// Idempotent
    async fn revoke(&self, token: &str) -> Result<(), AppError>;

    /// Revoke every token the user holds; returns how many were revoked
    async fn revoke_all(&self, user_id: Uuid) -> Result<u64, AppError>;

    /// Delete records with `expires_at < now`; returns how many were deleted
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

/// Map-backed store keyed by token hash
pub struct InMemoryRefreshTokenStore {
    ttl: Duration,
    tokens: Mutex<HashMap<String, RefreshToken>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.lock().await.is_empty()
    }

    fn insert_for(&self, tokens: &mut HashMap<String, RefreshToken>, user_id: Uuid) -> IssuedRefreshToken {
        tokens.retain(|_, record| record.user_id != user_id);

        let token = generate_token();
        let now = Utc::now();
        let record = RefreshToken {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash_token(&token),
            expires_at: now + self.ttl,
            revoked: false,
            created_at: now,
        };
        let expires_at = record.expires_at;
        tokens.insert(record.token_hash.clone(), record);

        IssuedRefreshToken {
            token,
            user_id,
            expires_at,
        }
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn issue(&self, user_id: Uuid) -> Result<IssuedRefreshToken, AppError> {
        let mut tokens = self.tokens.lock().await;
        Ok(self.insert_for(&mut tokens, user_id))
    }

    async fn find(&self, token: &str) -> Result<Option<RefreshToken>, AppError> {
        Ok(self.tokens.lock().await.get(&hash_token(token)).cloned())
    }

    async fn consume_and_rotate(&self, token: &str) -> Result<IssuedRefreshToken, AppError> {
        let token_hash = hash_token(token);
        let mut tokens = self.tokens.lock().await;

        let user_id = match tokens.get(&token_hash) {
            Some(record) if record.is_active_at(Utc::now()) => record.user_id,
            _ => return Err(AppError::Auth(AuthError::InvalidRefreshToken)),
        };
        tokens.remove(&token_hash);

        Ok(self.insert_for(&mut tokens, user_id))
    }

    async fn revoke(&self, token: &str) -> Result<(), AppError> {
        if let Some(record) = self.tokens.lock().await.get_mut(&hash_token(token)) {
            record.revoked = true;
        }
        Ok(())
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64, AppError> {
        let mut tokens = self.tokens.lock().await;
        let mut revoked = 0;
        for record in tokens.values_mut() {
            if record.user_id == user_id && !record.revoked {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tokens = self.tokens.lock().await;
        let before = tokens.len();
        tokens.retain(|_, record| record.expires_at >= now);
        Ok((before - tokens.len()) as u64)
    }
}
