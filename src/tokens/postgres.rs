/// Postgres-backed token stores
///
/// Redemption uses a single conditional `DELETE`/`UPDATE ... RETURNING`, so a
/// token can be redeemed at most once even when several processes share the
/// database.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AuthError};
use crate::tokens::refresh::{IssuedRefreshToken, RefreshToken, RefreshTokenStore};
use crate::tokens::reset::{
    IssuedResetToken, PasswordResetToken, PasswordResetTokenStore, ResetTokenStatus,
};
use crate::tokens::{generate_token, hash_token};

#[derive(Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
    ttl: Duration,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// Delete-before-insert inside the caller's transaction
    async fn replace_for_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<IssuedRefreshToken, AppError> {
        sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let token = generate_token();
        let now = Utc::now();
        let expires_at = now + self.ttl;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, is_revoked, created_at)
            VALUES ($1, $2, $3, $4, false, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(hash_token(&token))
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        Ok(IssuedRefreshToken {
            token,
            user_id,
            expires_at,
        })
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn issue(&self, user_id: Uuid) -> Result<IssuedRefreshToken, AppError> {
        let mut tx = self.pool.begin().await?;
        let issued = self.replace_for_user(&mut tx, user_id).await?;
        tx.commit().await?;

        tracing::debug!(user_id = %user_id, "Refresh token issued");
        Ok(issued)
    }

    async fn find(&self, token: &str) -> Result<Option<RefreshToken>, AppError> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, String, DateTime<Utc>, bool, DateTime<Utc>)>(
            r#"
            SELECT id, user_id, token_hash, expires_at, is_revoked, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(id, user_id, token_hash, expires_at, revoked, created_at)| RefreshToken {
                id,
                user_id,
                token_hash,
                expires_at,
                revoked,
                created_at,
            },
        ))
    }

    async fn consume_and_rotate(&self, token: &str) -> Result<IssuedRefreshToken, AppError> {
        let mut tx = self.pool.begin().await?;

        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM refresh_tokens
            WHERE token_hash = $1 AND is_revoked = false AND expires_at > $2
            RETURNING user_id
            "#,
        )
        .bind(hash_token(token))
        .bind(Utc::now())
        .fetch_optional(&mut tx)
        .await?
        .ok_or(AppError::Auth(AuthError::InvalidRefreshToken))?;

        let issued = self.replace_for_user(&mut tx, user_id).await?;
        tx.commit().await?;

        Ok(issued)
    }

    async fn revoke(&self, token: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = true, revoked_at = $1
            WHERE token_hash = $2 AND is_revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(hash_token(token))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = true, revoked_at = $1
            WHERE user_id = $2 AND is_revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgPasswordResetTokenStore {
    pool: PgPool,
    ttl: Duration,
}

impl PgPasswordResetTokenStore {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }
}

type ResetRow = (Uuid, Uuid, String, DateTime<Utc>, String, bool, DateTime<Utc>);

#[async_trait]
impl PasswordResetTokenStore for PgPasswordResetTokenStore {
    async fn request_reset(&self, user_id: Uuid) -> Result<IssuedResetToken, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE password_reset_tokens
            SET status = 'EXPIRED'
            WHERE user_id = $1 AND status = 'ACTIVE'
            "#,
        )
        .bind(user_id)
        .execute(&mut tx)
        .await?;

        let token = generate_token();
        let record = PasswordResetToken::new(user_id, hash_token(&token), self.ttl, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens
                (id, user_id, token_hash, expires_at, status, used, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.status.as_str())
        .bind(record.used)
        .bind(record.created_at)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(IssuedResetToken {
            token,
            user_id,
            expires_at: record.expires_at,
        })
    }

    async fn find(&self, token: &str) -> Result<Option<PasswordResetToken>, AppError> {
        let row = sqlx::query_as::<_, ResetRow>(
            r#"
            SELECT id, user_id, token_hash, expires_at, status, used, created_at
            FROM password_reset_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;

        row.map(
            |(id, user_id, token_hash, expires_at, status, used, created_at)| {
                Ok(PasswordResetToken {
                    id,
                    user_id,
                    token_hash,
                    expires_at,
                    status: status.parse::<ResetTokenStatus>()?,
                    used,
                    created_at,
                })
            },
        )
        .transpose()
    }

    async fn consume(&self, token: &str) -> Result<Uuid, AppError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE password_reset_tokens
            SET status = 'USED', used = true, used_at = $2
            WHERE token_hash = $1 AND status = 'ACTIVE' AND used = false AND expires_at > $2
            RETURNING user_id
            "#,
        )
        .bind(hash_token(token))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::Auth(AuthError::InvalidOrExpiredResetToken))
    }

    async fn mark_expired_batch(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE password_reset_tokens
            SET status = 'EXPIRED'
            WHERE status = 'ACTIVE' AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM password_reset_tokens WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
