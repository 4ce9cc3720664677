/// Authentication module
///
/// Credential verification, bcrypt password handling and the
/// access token codec.

mod claims;
mod credentials;
mod jwt;
mod password;

pub use claims::Claims;
pub use credentials::CredentialVerifier;
pub use jwt::AccessTokenCodec;
pub use password::verify_password;
pub use password::PasswordPolicy;
