use thiserror::Error;

/// Errors raised while minting or verifying session tokens.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}
