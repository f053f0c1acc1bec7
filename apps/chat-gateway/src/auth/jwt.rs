//! HS256 handshake token verification.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::{AuthError, AuthenticatedIdentity, Authenticator};

/// Claims accepted on a handshake token. Either `sub` or `user_id` names the
/// user; `name` is optional and becomes the sender name on live messages.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: i64,
}

pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<AuthenticatedIdentity, AuthError> {
        if token.is_empty() {
            return Err(AuthError {
                message: "Missing token",
            });
        }

        let data = jsonwebtoken::decode::<ChatClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(?e, "handshake token rejected");
                AuthError {
                    message: "Invalid or expired token",
                }
            })?;

        let claims = data.claims;
        let user_id = claims
            .user_id
            .or(claims.sub)
            .filter(|id| !id.is_empty())
            .ok_or(AuthError {
                message: "Token has no subject",
            })?;

        Ok(AuthenticatedIdentity {
            user_id,
            display_name: claims.name.filter(|n| !n.is_empty()),
        })
    }
}
