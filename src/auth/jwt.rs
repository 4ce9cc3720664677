/// Access Token Codec
///
/// Mints and verifies HS256-signed bearer tokens. The codec holds only
/// immutable key material, so one instance can be shared across tasks.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

pub struct AccessTokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl AccessTokenCodec {
    pub fn new(secret: &[u8], issuer: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        // `exp` is in milliseconds and checked in `verify`
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["sub", "iss"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer: issuer.to_string(),
        }
    }

    pub fn from_settings(config: &JwtSettings) -> Self {
        Self::new(config.secret.as_bytes(), &config.issuer)
    }

    /// Mint a signed access token for `subject`, valid for `ttl`
    ///
    /// # Errors
    /// Returns error if encoding fails
    pub fn mint(
        &self,
        subject: &str,
        user_id: Option<Uuid>,
        ttl: Duration,
    ) -> Result<String, AppError> {
        let claims = Claims::new(subject, user_id, ttl, &self.issuer);

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verify signature, issuer and expiry, in that order
    ///
    /// # Errors
    /// Every failure is reported as `TokenInvalid`; the cause is only logged.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                AppError::Auth(AuthError::TokenInvalid)
            })?;

        if claims.is_expired_at(Utc::now().timestamp_millis()) {
            tracing::debug!(sub = %claims.sub, "Access token expired");
            return Err(AppError::Auth(AuthError::TokenInvalid));
        }

        Ok(claims)
    }
}
