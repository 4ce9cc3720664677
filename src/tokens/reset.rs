/// Password Reset Token Store
///
/// Reset tokens move through a small state machine:
///
/// ```text
/// ACTIVE --use--> USED        (only while unused and unexpired)
/// ACTIVE --expire--> EXPIRED  (explicitly, by a newer request, or by the sweep)
/// ```
///
/// `status` and `used` are tracked separately so an unused token that timed
/// out stays distinguishable from one that was redeemed.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AuthError};
use crate::tokens::{generate_token, hash_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTokenStatus {
    Active,
    Used,
    Expired,
}

impl ResetTokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetTokenStatus::Active => "ACTIVE",
            ResetTokenStatus::Used => "USED",
            ResetTokenStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ResetTokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResetTokenStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ResetTokenStatus::Active),
            "USED" => Ok(ResetTokenStatus::Used),
            "EXPIRED" => Ok(ResetTokenStatus::Expired),
            other => Err(AppError::Internal(format!("Unknown reset token status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub status: ResetTokenStatus,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetToken {
    pub fn new(user_id: Uuid, token_hash: String, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token_hash,
            expires_at: now + ttl,
            status: ResetTokenStatus::Active,
            used: false,
            created_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn can_be_used_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ResetTokenStatus::Active && !self.used && !self.is_expired_at(now)
    }

    /// ACTIVE -> USED
    pub fn mark_used(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        if !self.can_be_used_at(now) {
            return Err(AppError::Auth(AuthError::InvalidOrExpiredResetToken));
        }
        self.used = true;
        self.status = ResetTokenStatus::Used;
        Ok(())
    }

    /// ACTIVE -> EXPIRED; returns false if the token was not active
    pub fn mark_expired(&mut self) -> bool {
        if self.status != ResetTokenStatus::Active {
            return false;
        }
        self.status = ResetTokenStatus::Expired;
        true
    }
}

#[derive(Debug, Clone)]
pub struct IssuedResetToken {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait PasswordResetTokenStore: Send + Sync {
    /// Expire the user's active tokens, then create a new active one
    async fn request_reset(&self, user_id: Uuid) -> Result<IssuedResetToken, AppError>;

    /// Look up a record regardless of its state
    async fn find(&self, token: &str) -> Result<Option<PasswordResetToken>, AppError>;

    async fn validate(&self, token: &str) -> Result<bool, AppError> {
        let now = Utc::now();
        Ok(self
            .find(token)
            .await?
            .map_or(false, |record| record.can_be_used_at(now)))
    }

    /// Redeem the token exactly once and return its owner
    async fn consume(&self, token: &str) -> Result<Uuid, AppError>;

    /// ACTIVE tokens with `expires_at < now` become EXPIRED; rows are kept
    async fn mark_expired_batch(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

    /// Delete tokens created before `cutoff`, whatever their status
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

pub struct InMemoryPasswordResetTokenStore {
    ttl: Duration,
    tokens: Mutex<HashMap<String, PasswordResetToken>>,
}

impl InMemoryPasswordResetTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// All records owned by `user_id`
    pub async fn tokens_for(&self, user_id: Uuid) -> Vec<PasswordResetToken> {
        self.tokens
            .lock()
            .await
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.lock().await.is_empty()
    }
}

#[async_trait]
impl PasswordResetTokenStore for InMemoryPasswordResetTokenStore {
    async fn request_reset(&self, user_id: Uuid) -> Result<IssuedResetToken, AppError> {
        let mut tokens = self.tokens.lock().await;

        for record in tokens.values_mut().filter(|r| r.user_id == user_id) {
            record.mark_expired();
        }

        let token = generate_token();
        let record = PasswordResetToken::new(user_id, hash_token(&token), self.ttl, Utc::now());
        let expires_at = record.expires_at;
        tokens.insert(record.token_hash.clone(), record);

        Ok(IssuedResetToken {
            token,
            user_id,
            expires_at,
        })
    }

    async fn find(&self, token: &str) -> Result<Option<PasswordResetToken>, AppError> {
        Ok(self.tokens.lock().await.get(&hash_token(token)).cloned())
    }

    async fn consume(&self, token: &str) -> Result<Uuid, AppError> {
        let mut tokens = self.tokens.lock().await;
        let record = tokens
            .get_mut(&hash_token(token))
            .ok_or(AppError::Auth(AuthError::InvalidOrExpiredResetToken))?;

        record.mark_used(Utc::now())?;
        Ok(record.user_id)
    }

    async fn mark_expired_batch(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tokens = self.tokens.lock().await;
        let mut expired = 0;
        for record in tokens.values_mut() {
            if record.expires_at < now && record.mark_expired() {
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tokens = self.tokens.lock().await;
        let before = tokens.len();
        tokens.retain(|_, record| record.created_at >= cutoff);
        Ok((before - tokens.len()) as u64)
    }
}
