pub mod jwt;

pub use jwt::JwtAuthenticator;

/// Who is on the other end of a socket. Produced once at handshake and never
/// re-read from client frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub user_id: String,
    pub display_name: Option<String>,
}

/// Handshake rejection. Rendered to the socket as an `error` envelope followed
/// by a close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthError {
    pub message: &'static str,
}

/// Verifies a handshake token. Token issuance lives outside the gateway.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<AuthenticatedIdentity, AuthError>;
}
