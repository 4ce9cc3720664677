/// Opaque token stores
///
/// Refresh and password-reset tokens are:
/// - Cryptographically secure random 64-character strings
/// - Hashed with SHA-256 before storage (never store plaintext)
/// - Reachable only through the store traits, so the backing is swappable

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};

mod postgres;
mod refresh;
mod reset;

pub use postgres::{PgPasswordResetTokenStore, PgRefreshTokenStore};
pub use refresh::{InMemoryRefreshTokenStore, IssuedRefreshToken, RefreshToken, RefreshTokenStore};
pub use reset::{
    InMemoryPasswordResetTokenStore, IssuedResetToken, PasswordResetToken,
    PasswordResetTokenStore, ResetTokenStatus,
};

const TOKEN_LENGTH: usize = 64;

/// Generate a new opaque token
///
/// The token is returned in plaintext (this is what the client holds).
/// Stores keep only `hash_token` of it.
pub fn generate_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest used as the storage key
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
