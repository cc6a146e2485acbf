//! JWT authentication for WebSocket upgrades.
//!
//! Clients present an HS256-signed token either as
//! `Authorization: Bearer <token>` or as the `token` query parameter:
//!
//! ```bash
//! websocat "ws://localhost:8080/ws?token=eyJhbGciOiJIUzI1NiIs..."
//! ```
//!
//! The `sub` claim becomes the connection's nickname for its whole lifetime.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use knox_core::{AuthError, Authenticator, Credentials, Identity};
use serde::{Deserialize, Serialize};

/// JWT claims accepted by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (nickname)
    pub sub: String,
    /// Expiration (Unix timestamp, seconds)
    pub exp: u64,
}

/// Verifies HS256 connection tokens.
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Create an authenticator for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn verify(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let token_data = decode::<Claims>(credentials.token(), &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidCredentials(e.to_string()),
            })?;

        let identity = Identity::new(token_data.claims.sub);
        if identity.is_blank() {
            return Err(AuthError::EmptyIdentity);
        }
        Ok(identity)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use knox_core::message::now_millis;

    /// Sign a token for `sub` valid for `ttl_secs` (negative for expired).
    pub(crate) fn token_for(secret: &str, sub: &str, ttl_secs: i64) -> String {
        let now = (now_millis() / 1000) as i64;
        let claims = Claims {
            sub: sub.to_string(),
            exp: (now + ttl_secs) as u64,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token() {
        let auth = JwtAuthenticator::new("secret");
        let token = token_for("secret", "alice", 3600);

        let identity = auth.verify(&Credentials::bearer(token)).unwrap();
        assert_eq!(identity.as_str(), "alice");
    }

    #[test]
    fn test_expired_token() {
        let auth = JwtAuthenticator::new("secret");
        let token = token_for("secret", "alice", -3600);

        assert_eq!(
            auth.verify(&Credentials::bearer(token)),
            Err(AuthError::Expired)
        );
    }

    #[test]
    fn test_wrong_secret() {
        let auth = JwtAuthenticator::new("secret");
        let token = token_for("other-secret", "alice", 3600);

        assert!(matches!(
            auth.verify(&Credentials::bearer(token)),
            Err(AuthError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_empty_subject() {
        let auth = JwtAuthenticator::new("secret");
        let token = token_for("secret", "   ", 3600);

        assert_eq!(
            auth.verify(&Credentials::bearer(token)),
            Err(AuthError::EmptyIdentity)
        );
    }

    #[test]
    fn test_garbage_token() {
        let auth = JwtAuthenticator::new("secret");
        assert!(auth.verify(&Credentials::bearer("not-a-jwt")).is_err());
    }
}
