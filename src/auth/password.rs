/// Password Hashing and Verification
///
/// Handles bcrypt hashing and the password length policy.
///
/// bcrypt reads at most 72 bytes of input, so passwords are reduced to a
/// SHA-256 hex digest first. Every byte of the password then affects the
/// stored hash.

use bcrypt::{hash, verify};
use sha2::{Digest, Sha256};

use crate::configuration::PasswordSettings;
use crate::error::{AppError, AuthError};

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    min_length: usize,
    max_length: usize,
    bcrypt_cost: u32,
}

impl PasswordPolicy {
    pub fn new(min_length: usize, max_length: usize, bcrypt_cost: u32) -> Self {
        Self {
            min_length,
            max_length,
            bcrypt_cost,
        }
    }

    pub fn from_settings(settings: &PasswordSettings) -> Self {
        Self::new(settings.min_length, settings.max_length, settings.bcrypt_cost)
    }

    /// Check length bounds, counted in characters
    pub fn validate(&self, password: &str) -> Result<(), AppError> {
        let length = password.chars().count();
        if length < self.min_length || length > self.max_length {
            return Err(AppError::Auth(AuthError::WeakPassword {
                min_length: self.min_length,
            }));
        }
        Ok(())
    }

    /// Validate then hash a new password
    ///
    /// # Errors
    /// Returns error if:
    /// - Password fails the policy
    /// - Bcrypt hashing fails
    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        self.validate(password)?;
        self.hash_unchecked(password)
    }

    /// Hash at the configured cost without applying the length policy
    pub(super) fn hash_unchecked(&self, password: &str) -> Result<String, AppError> {
        hash(prehash(password), self.bcrypt_cost)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }
}

/// Verify a password against its bcrypt hash
///
/// bcrypt compares digests in constant time.
///
/// # Errors
/// Returns error if the stored hash is malformed
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    verify(prehash(password), hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}

fn prehash(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}
