use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use super::errors::CeremonyError;
use crate::utils::gen_random_string;

/// Which ceremony a pending challenge was issued for. A registration
/// challenge must never redeem an authentication response or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CeremonyKind {
    Registration,
    Authentication,
}

impl CeremonyKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "reg",
            Self::Authentication => "auth",
        }
    }
}

/// Identity captured when a registration ceremony starts, echoed back to
/// the verifier when the matching response arrives.
#[derive(Debug, Clone)]
pub(crate) struct PendingIdentity {
    pub(crate) user_handle: String,
    pub(crate) username: String,
    pub(crate) display_name: Option<String>,
    pub(crate) email: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingCeremony {
    pub(crate) challenge: String,
    pub(crate) identity: Option<PendingIdentity>,
    issued_at: u64,
    ttl: Duration,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Short-lived, at-most-once store of issued challenges, keyed by the
/// challenge value itself.
///
/// The original design trusted the client to echo the challenge back
/// unaltered, with no server-side single-use enforcement; this store
/// closes that replay window. `consume` removes the entry under the lock,
/// so concurrent redemption attempts for the same challenge see exactly
/// one winner.
#[derive(Default)]
pub(crate) struct ChallengeStore {
    entries: Mutex<HashMap<String, PendingCeremony>>,
}

impl ChallengeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn make_key(kind: CeremonyKind, challenge: &str) -> String {
        format!("{}:{}", kind.as_str(), challenge)
    }

    /// Generate a fresh 32-byte challenge and record it as pending.
    pub(crate) async fn issue(
        &self,
        kind: CeremonyKind,
        identity: Option<PendingIdentity>,
        ttl: Duration,
    ) -> Result<String, CeremonyError> {
        let challenge = gen_random_string(32)
            .map_err(|e| CeremonyError::StorageFailure(format!("Randomness unavailable: {e}")))?;

        let pending = PendingCeremony {
            challenge: challenge.clone(),
            identity,
            issued_at: unix_now(),
            ttl,
        };

        let mut entries = self.entries.lock().await;
        // Opportunistic purge keeps abandoned ceremonies from accumulating
        let now = unix_now();
        entries.retain(|_, p| now.saturating_sub(p.issued_at) <= p.ttl.as_secs());
        entries.insert(Self::make_key(kind, &challenge), pending);

        Ok(challenge)
    }

    /// Redeem a challenge, removing it so a second redemption fails.
    ///
    /// Unknown, already-consumed and expired challenges are all reported
    /// as the same verification failure.
    pub(crate) async fn consume(
        &self,
        kind: CeremonyKind,
        challenge: &str,
    ) -> Result<PendingCeremony, CeremonyError> {
        let mut entries = self.entries.lock().await;
        let pending = entries
            .remove(&Self::make_key(kind, challenge))
            .ok_or_else(|| {
                CeremonyError::VerificationFailed(
                    "Unknown or already used challenge".to_string(),
                )
            })?;

        let age = unix_now().saturating_sub(pending.issued_at);
        if age > pending.ttl.as_secs() {
            tracing::warn!(age, ttl = pending.ttl.as_secs(), "Challenge expired");
            return Err(CeremonyError::VerificationFailed(
                "Challenge has expired".to_string(),
            ));
        }

        Ok(pending)
    }
}
