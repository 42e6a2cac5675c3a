use std::sync::Arc;

use crate::config::RpConfig;
use crate::session::SessionIssuer;
use crate::store::{CredentialRepository, User};
use crate::utils::gen_random_string;

use super::challenge::ChallengeStore;
use super::errors::CeremonyError;

/// The ceremony engine: challenge issuance plus the registration and
/// authentication verifiers, wired to a credential repository and a
/// session issuer.
///
/// Safe to share across concurrent ceremonies; all interior state is the
/// pending-challenge store, which enforces at-most-once redemption.
pub struct CeremonyEngine {
    pub(crate) config: RpConfig,
    pub(crate) repository: Arc<dyn CredentialRepository>,
    pub(crate) sessions: Arc<dyn SessionIssuer>,
    pub(crate) challenges: ChallengeStore,
}

impl CeremonyEngine {
    pub fn new(
        config: RpConfig,
        repository: Arc<dyn CredentialRepository>,
        sessions: Arc<dyn SessionIssuer>,
    ) -> Self {
        Self {
            config,
            repository,
            sessions,
            challenges: ChallengeStore::new(),
        }
    }

    pub fn config(&self) -> &RpConfig {
        &self.config
    }

    /// Mint a session token for a verified identity. A failure here must
    /// surface to the caller; verification success alone is not a login.
    pub(crate) async fn issue_session(&self, user: &User) -> Result<String, CeremonyError> {
        let token = self.sessions.issue(&user.id, &user.username).await?;
        Ok(token)
    }

    pub(crate) fn gen_user_id() -> Result<String, CeremonyError> {
        gen_random_string(16)
            .map_err(|e| CeremonyError::StorageFailure(format!("Randomness unavailable: {e}")))
    }

    pub(crate) fn gen_user_handle() -> Result<String, CeremonyError> {
        gen_random_string(32)
            .map_err(|e| CeremonyError::StorageFailure(format!("Randomness unavailable: {e}")))
    }
}
