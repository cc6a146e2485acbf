//! Authentication seam.
//!
//! Credential storage and verification live outside the core; the server
//! plugs in an [`Authenticator`] that turns presented credentials into a
//! stable [`Identity`].

use crate::connection::Identity;
use thiserror::Error;

/// Credentials presented when a connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    /// Wrap a bearer token.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Parse an `Authorization` header value of the form `Bearer <token>`.
    #[must_use]
    pub fn from_authorization(header: &str) -> Option<Self> {
        let (scheme, token) = header.trim().split_once(' ')?;
        let token = token.trim();
        if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
            Some(Self::bearer(token))
        } else {
            None
        }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Authentication failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No credentials were presented.
    #[error("Missing credentials")]
    MissingCredentials,

    /// The credentials could not be verified.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The credentials are no longer valid.
    #[error("Credentials expired")]
    Expired,

    /// Verification succeeded but yielded no usable identity.
    #[error("Empty identity")]
    EmptyIdentity,
}

/// Verifies credentials and yields the user's identity.
pub trait Authenticator: Send + Sync {
    /// Verify credentials.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the credentials are not acceptable.
    fn verify(&self, credentials: &Credentials) -> Result<Identity, AuthError>;
}
