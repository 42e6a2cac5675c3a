use thiserror::Error;

use crate::session::SessionError;

/// Every failure a ceremony can surface to the calling transport layer.
///
/// Internal store, crypto and codec errors are translated into one of
/// these kinds at the ceremony boundary; nothing else leaks out. The
/// transport is expected to map each kind to a generic client message
/// (so username existence is not enumerable) while logging the kind.
#[derive(Debug, Error)]
pub enum CeremonyError {
    /// Missing or invalid request fields, caller error
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Cryptographic failure or challenge/origin/RP ID mismatch
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Unknown credential id presented at authentication
    #[error("Credential not found")]
    CredentialNotFound,

    /// Counter regression or a lost conditional counter update,
    /// suspected cloned credential or replayed response
    #[error("Counter regression detected, possible credential clone or replay")]
    ReplayOrCloneSuspected,

    /// Repository unavailable or partial write
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Duplicate username at registration
    #[error("Username already registered: {0}")]
    UserCreationConflict(String),

    /// Token minting failed after successful verification
    #[error("Session issuance failed: {0}")]
    SessionIssuance(String),
}

impl From<SessionError> for CeremonyError {
    fn from(err: SessionError) -> Self {
        CeremonyError::SessionIssuance(err.to_string())
    }
}
