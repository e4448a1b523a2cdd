//! External services the user service depends on.
//!
//! Token issuance and password hashing algorithms live outside this crate;
//! callers plug in implementations of these traits.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Identity proven by a credential token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    /// Token to hand back to the caller (possibly refreshed).
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError(pub String);

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "authentication failed: {}", self.0)
    }
}

impl Error for AuthError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashError(pub String);

impl Display for HashError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "password hashing failed: {}", self.0)
    }
}

impl Error for HashError {}

/// Verifies an authorization value such as `Token <jwt>`.
pub trait Authenticator {
    fn verify(&self, authorization: &str) -> Result<Session, AuthError>;
}

/// Turns a plaintext password into an opaque credential.
///
/// Equal inputs are expected to produce byte-equal outputs often enough for
/// change detection; a differing output simply counts as a password change.
pub trait PasswordHasher {
    fn hash(&self, plaintext: &str) -> Result<Vec<u8>, HashError>;
}
