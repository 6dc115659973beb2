//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs issued by the account endpoint (outside this
//! server) with the player id in `sub`. The session handshake verifies
//! the token locally; ban and timeout checks run afterwards against the
//! player row.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::service::{ErrorCode, ServiceError};

/// Verified identity extracted from a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub player_id: i64,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Player id, as a string per JWT convention.
    sub: String,
    username: String,
    exp: u64,
}

/// Verifies session tokens.
pub struct TokenVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Verifies a bearer token and extracts the player identity.
    ///
    /// # Errors
    ///
    /// `not_authenticated` for anything wrong with the token: bad
    /// signature, expired, malformed subject.
    pub fn verify(&self, token: &str) -> Result<AuthClaims, ServiceError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|_| ServiceError::new(ErrorCode::NotAuthenticated, "Invalid token"))?;
        let player_id = data
            .claims
            .sub
            .parse()
            .map_err(|_| ServiceError::new(ErrorCode::NotAuthenticated, "Invalid token"))?;
        Ok(AuthClaims {
            player_id,
            username: data.claims.username,
        })
    }
}

/// Issues a token. Used by account tooling and tests; the game server
/// itself only verifies.
///
/// # Errors
///
/// Returns an error if signing fails.
pub fn issue_token(
    secret: &str,
    player_id: i64,
    username: &str,
    expires_at: u64,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: player_id.to_string(),
        username: username.to_string(),
        exp: expires_at,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn far_future() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600
    }

    #[test]
    fn issued_tokens_verify() {
        let verifier = TokenVerifier::new("secret");
        let token = issue_token("secret", 7, "alice", far_future()).unwrap();
        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.player_id, 7);
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let verifier = TokenVerifier::new("secret");
        let token = issue_token("other-secret", 7, "alice", far_future()).unwrap();
        let err = verifier.verify(&token).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotAuthenticated);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let verifier = TokenVerifier::new("secret");
        let token = issue_token("secret", 7, "alice", 1_000).unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        let verifier = TokenVerifier::new("secret");
        assert!(verifier.verify("not-a-jwt").is_err());
        assert!(verifier.verify("").is_err());
    }
}
