/// Credential Verifier
///
/// Read-only check of an identifier/password pair against the user directory.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::auth::password::{verify_password, PasswordPolicy};
use crate::error::{AppError, AuthError};
use crate::users::{Principal, UserDirectory};
use crate::validators::is_valid_identifier;

const DUMMY_PASSWORD: &str = "unknown-account-placeholder";

#[derive(Clone)]
pub struct CredentialVerifier {
    users: Arc<dyn UserDirectory>,
    policy: PasswordPolicy,
    // Hash at the configured cost, checked when the identifier is unknown
    dummy_hash: Arc<OnceCell<String>>,
}

impl CredentialVerifier {
    pub fn new(users: Arc<dyn UserDirectory>, policy: PasswordPolicy) -> Self {
        Self {
            users,
            policy,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Authenticate by username or email.
    ///
    /// Unknown identifiers and wrong passwords produce the same
    /// `InvalidCredentials` error, and both pay for one bcrypt verification.
    /// The disabled check runs only after the password matched, so it does
    /// not reveal which accounts exist.
    pub async fn authenticate(&self, identifier: &str, password: &str) -> Result<Principal, AppError> {
        let identifier = is_valid_identifier(identifier)
            .map_err(|_| AppError::Auth(AuthError::InvalidCredentials))?;

        let principal = match self.users.find_by_username_or_email(identifier).await? {
            Some(principal) => principal,
            None => {
                let dummy = self
                    .dummy_hash
                    .get_or_try_init(|| async { self.policy.hash_unchecked(DUMMY_PASSWORD) })
                    .await?;
                verify_password(password, dummy)?;
                return Err(AppError::Auth(AuthError::InvalidCredentials));
            }
        };

        if !verify_password(password, &principal.password_hash)? {
            return Err(AppError::Auth(AuthError::InvalidCredentials));
        }

        if !principal.active {
            return Err(AppError::Auth(AuthError::AccountDisabled));
        }

        Ok(principal)
    }
}
