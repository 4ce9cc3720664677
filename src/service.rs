/// Auth Orchestrator
///
/// The only entry point controllers call. Every flow is stateless between
/// calls; state lives in the user directory and the token stores. Flows that
/// need an authenticated caller take the verified `Claims` explicitly.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::auth::{verify_password, AccessTokenCodec, Claims, CredentialVerifier, PasswordPolicy};
use crate::configuration::{JwtSettings, PasswordResetSettings, Settings};
use crate::email_client::EmailDispatcher;
use crate::error::{AppError, AuthError, ErrorContext};
use crate::tokens::{PasswordResetTokenStore, RefreshTokenStore};
use crate::users::{Principal, UserDirectory};
use crate::validators::is_valid_email;

const TOKEN_TYPE: &str = "Bearer";
const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent";
const RESET_EMAIL_SUBJECT: &str = "Reset your password";

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in_seconds: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in_seconds: i64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserDirectory>,
    credentials: CredentialVerifier,
    codec: Arc<AccessTokenCodec>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    reset_tokens: Arc<dyn PasswordResetTokenStore>,
    email: Arc<dyn EmailDispatcher>,
    password_policy: PasswordPolicy,
    jwt: JwtSettings,
    password_reset: PasswordResetSettings,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        reset_tokens: Arc<dyn PasswordResetTokenStore>,
        email: Arc<dyn EmailDispatcher>,
        settings: &Settings,
    ) -> Self {
        Self {
            credentials: CredentialVerifier::new(
                users.clone(),
                PasswordPolicy::from_settings(&settings.password),
            ),
            users,
            codec: Arc::new(AccessTokenCodec::from_settings(&settings.jwt)),
            refresh_tokens,
            reset_tokens,
            email,
            password_policy: PasswordPolicy::from_settings(&settings.password),
            jwt: settings.jwt.clone(),
            password_reset: settings.password_reset.clone(),
        }
    }

    pub fn codec(&self) -> &AccessTokenCodec {
        &self.codec
    }

    /// Authenticate with username or email and password.
    ///
    /// # Errors
    /// - `InvalidCredentials`: unknown identifier or wrong password
    /// - `AccountDisabled`: correct password for an inactive account
    pub async fn login(&self, identifier: &str, password: &str) -> Result<LoginResponse, AppError> {
        let context = ErrorContext::new("login");

        let principal = self
            .credentials
            .authenticate(identifier, password)
            .await
            .inspect_err(|e| context.log_error(e))?;

        let access_token = self.mint_access_token(&principal)?;
        let refresh = self.refresh_tokens.issue(principal.id).await?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %principal.id,
            "User logged in successfully"
        );

        Ok(LoginResponse {
            access_token,
            refresh_token: refresh.token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in_seconds: self.jwt.access_token_ttl_seconds(),
            username: principal.username,
            email: principal.email,
        })
    }

    /// Exchange a refresh token for a new access token and a rotated
    /// refresh token. The presented token is dead afterwards.
    ///
    /// # Errors
    /// - `InvalidRefreshToken`: absent, revoked, expired or already rotated
    /// - `UserNotFound` / `AccountDisabled`: owner vanished or was disabled
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, AppError> {
        let context = ErrorContext::new("token_refresh");

        let record = self
            .refresh_tokens
            .find(refresh_token)
            .await?
            .filter(|record| record.is_active_at(Utc::now()))
            .ok_or(AppError::Auth(AuthError::InvalidRefreshToken))
            .inspect_err(|e| context.log_error(e))?;

        let principal = match self.users.find_by_id(record.user_id).await? {
            Some(principal) => principal,
            None => {
                let error = AppError::Auth(AuthError::UserNotFound);
                context.clone().with_user_id(record.user_id.to_string()).log_error(&error);
                return Err(error);
            }
        };
        if !principal.active {
            self.refresh_tokens.revoke_all(principal.id).await?;
            return Err(AppError::Auth(AuthError::AccountDisabled));
        }

        let access_token = self.mint_access_token(&principal)?;
        let rotated = self
            .refresh_tokens
            .consume_and_rotate(refresh_token)
            .await
            .inspect_err(|e| context.log_error(e))?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %principal.id,
            "Token refreshed successfully"
        );

        Ok(RefreshResponse {
            access_token,
            refresh_token: rotated.token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in_seconds: self.jwt.access_token_ttl_seconds(),
        })
    }

    /// Revoke the presented refresh token. Unknown or already revoked
    /// tokens are accepted silently.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AppError> {
        self.refresh_tokens.revoke(refresh_token).await?;
        tracing::info!("Refresh token revoked on logout");
        Ok(())
    }

    /// Revoke every refresh token of the authenticated user
    pub async fn logout_all(&self, claims: &Claims) -> Result<u64, AppError> {
        let user_id = claims.user_id()?;
        let revoked = self.refresh_tokens.revoke_all(user_id).await?;
        tracing::info!(user_id = %user_id, revoked = revoked, "User logged out everywhere");
        Ok(revoked)
    }

    /// Verify a bearer access token and return its claims
    pub fn authenticate(&self, access_token: &str) -> Result<Claims, AppError> {
        self.codec.verify(access_token)
    }

    /// Change the authenticated user's password and sign out every other
    /// session.
    ///
    /// # Errors
    /// - `WeakPassword`: new password outside the length policy
    /// - `InvalidCredentials`: current password does not match
    /// - `UserNotFound`: the token's user no longer exists
    pub async fn change_password(
        &self,
        claims: &Claims,
        current_password: &str,
        new_password: &str,
    ) -> Result<MessageResponse, AppError> {
        let user_id = claims.user_id()?;
        let context = ErrorContext::new("change_password").with_user_id(user_id.to_string());

        self.password_policy
            .validate(new_password)
            .inspect_err(|e| context.log_error(e))?;

        let mut principal = self.require_user(&context, user_id).await?;
        if !principal.active {
            return Err(AppError::Auth(AuthError::AccountDisabled));
        }

        if !verify_password(current_password, &principal.password_hash)? {
            let error = AppError::Auth(AuthError::InvalidCredentials);
            context.log_error(&error);
            return Err(error);
        }

        self.store_new_password(&mut principal, new_password).await?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user_id,
            "Password changed"
        );

        Ok(MessageResponse::ok("Password changed successfully"))
    }

    /// Start a password reset. The response is identical whether or not the
    /// email belongs to an account.
    pub async fn forgot_password(&self, email: &str) -> Result<MessageResponse, AppError> {
        let context = ErrorContext::new("forgot_password");
        let email = is_valid_email(email)?;

        let principal = match self.users.find_by_email(&email).await? {
            Some(principal) if principal.active => principal,
            _ => {
                tracing::info!(
                    request_id = %context.request_id,
                    "Password reset requested for unknown or inactive account"
                );
                return Ok(MessageResponse::ok(FORGOT_PASSWORD_MESSAGE));
            }
        };

        let issued = self.reset_tokens.request_reset(principal.id).await?;
        let body = self.reset_email_body(&principal, &issued.token);

        if let Err(e) = self.email.send(&principal.email, RESET_EMAIL_SUBJECT, &body).await {
            tracing::warn!(
                request_id = %context.request_id,
                user_id = %principal.id,
                error = %e,
                "Failed to dispatch password reset email"
            );
        } else {
            tracing::info!(
                request_id = %context.request_id,
                user_id = %principal.id,
                "Password reset email dispatched"
            );
        }

        Ok(MessageResponse::ok(FORGOT_PASSWORD_MESSAGE))
    }

    /// Redeem a reset token and set the new password.
    ///
    /// The password policy is checked before the token is consumed so a
    /// rejected password does not burn the token.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<MessageResponse, AppError> {
        let context = ErrorContext::new("reset_password");

        self.password_policy
            .validate(new_password)
            .inspect_err(|e| context.log_error(e))?;

        let user_id = self
            .reset_tokens
            .consume(token)
            .await
            .inspect_err(|e| context.log_error(e))?;

        let mut principal = self.require_user(&context, user_id).await?;
        self.store_new_password(&mut principal, new_password).await?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user_id,
            "Password reset completed"
        );

        Ok(MessageResponse::ok("Password has been reset successfully"))
    }

    fn mint_access_token(&self, principal: &Principal) -> Result<String, AppError> {
        self.codec
            .mint(&principal.username, Some(principal.id), self.jwt.access_token_ttl())
    }

    async fn require_user(
        &self,
        context: &ErrorContext,
        user_id: uuid::Uuid,
    ) -> Result<Principal, AppError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::Auth(AuthError::UserNotFound))
            .inspect_err(|e| context.log_error(e))
    }

    /// Hash and persist the new password, then revoke all refresh tokens
    async fn store_new_password(
        &self,
        principal: &mut Principal,
        new_password: &str,
    ) -> Result<(), AppError> {
        principal.password_hash = self.password_policy.hash(new_password)?;
        self.users.save(principal).await?;
        self.refresh_tokens.revoke_all(principal.id).await?;
        Ok(())
    }

    fn reset_email_body(&self, principal: &Principal, token: &str) -> String {
        format!(
            "Hello {},\n\n\
             Use the link below to reset your password:\n\n\
             {}?token={}\n\n\
             The link expires in {} minutes. If you did not request a reset, ignore this email.",
            principal.username,
            self.password_reset.reset_url,
            token,
            self.password_reset.token_ttl().num_minutes(),
        )
    }
}
