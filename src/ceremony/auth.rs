use ring::{digest, signature::UnparsedPublicKey};

use crate::store::StoredCredential;
use crate::utils::base64url_decode;

use super::challenge::CeremonyKind;
use super::engine::CeremonyEngine;
use super::errors::CeremonyError;
use super::types::{
    AllowCredential, AuthenticationOptions, AuthenticatorData, AuthenticatorResponse,
    ParsedClientData, SignedIn,
};

/// Outcome of evaluating the reported signature counter against the
/// stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CounterOutcome {
    /// Counter moved forward; the stored value must be advanced.
    Advance,
    /// Both counters are zero: the authenticator does not implement
    /// counters, nothing to persist.
    CounterlessOk,
    /// Regression or stall on a counter-bearing credential.
    Regression,
}

/// Counter rule: the reported value must be strictly greater than the
/// stored one, except when both are exactly zero.
pub(crate) fn evaluate_counter(stored: u32, reported: u32) -> CounterOutcome {
    if reported > stored {
        CounterOutcome::Advance
    } else if reported == 0 && stored == 0 {
        CounterOutcome::CounterlessOk
    } else {
        CounterOutcome::Regression
    }
}

impl CeremonyEngine {
    /// Begin an authentication ceremony.
    ///
    /// With a username that resolves to a known user, the options carry an
    /// allow-list of that user's credentials; otherwise the allow-list is
    /// empty and any discoverable credential may attempt to sign in. A
    /// repository failure during the lookup degrades to an empty
    /// allow-list rather than aborting the ceremony.
    pub async fn start_authentication(
        &self,
        username: Option<&str>,
    ) -> Result<AuthenticationOptions, CeremonyError> {
        let allow_credentials = match username {
            Some(username) => self.allow_list_for(username).await,
            None => Vec::new(),
        };

        let challenge = self
            .challenges
            .issue(
                CeremonyKind::Authentication,
                None,
                self.config.challenge_ttl,
            )
            .await?;

        Ok(AuthenticationOptions {
            challenge,
            timeout: self.config.timeout.as_millis() as u64,
            rp_id: self.config.rp_id.clone(),
            allow_credentials,
            user_verification: self.config.user_verification.as_str().to_string(),
        })
    }

    async fn allow_list_for(&self, username: &str) -> Vec<AllowCredential> {
        let user = match self.repository.find_user_by_username(username).await {
            Ok(Some(user)) => user,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "User lookup failed, offering empty allow-list");
                return Vec::new();
            }
        };

        match self.repository.list_credentials_for_user(&user.id).await {
            Ok(credentials) => credentials
                .into_iter()
                .map(|c| AllowCredential {
                    type_: "public-key".to_string(),
                    id: c.credential_id,
                    transports: c.transports,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Credential lookup failed, offering empty allow-list");
                Vec::new()
            }
        }
    }

    /// Complete an authentication ceremony.
    ///
    /// Verifies the assertion against the stored credential's public key,
    /// evaluates counter monotonicity, advances the stored counter with a
    /// conditional update, and mints a session token. A lost conditional
    /// update is treated as a suspected replay, not a success.
    pub async fn finish_authentication(
        &self,
        response: AuthenticatorResponse,
        expected_challenge: &str,
    ) -> Result<SignedIn, CeremonyError> {
        response.validate()?;

        let pending = self
            .challenges
            .consume(CeremonyKind::Authentication, expected_challenge)
            .await?;

        let client_data = ParsedClientData::from_base64(&response.response.client_data_json)?;
        client_data.verify(&self.config, &pending.challenge, "webauthn.get")?;

        let auth_data = AuthenticatorData::from_base64(&response.response.authenticator_data)?;
        auth_data.verify(&self.config)?;

        let (credential, user) = self
            .repository
            .find_credential_by_id(&response.raw_id)
            .await
            .map_err(|e| CeremonyError::StorageFailure(e.to_string()))?
            .ok_or(CeremonyError::CredentialNotFound)?;

        // The assertion carries no direct discoverability signal; backup
        // eligibility is the closest proxy, so BE=1 assertions must carry
        // the user handle even in allow-list flows.
        verify_user_handle(&response, &credential, auth_data.is_backup_eligible())?;
        verify_signature(&response, &client_data, &auth_data, &credential)?;

        match evaluate_counter(credential.sign_count, auth_data.counter) {
            CounterOutcome::Advance => {
                let applied = self
                    .repository
                    .update_credential_counter(
                        &credential.credential_id,
                        credential.sign_count,
                        auth_data.counter,
                    )
                    .await
                    .map_err(|e| CeremonyError::StorageFailure(e.to_string()))?;
                if !applied {
                    // Someone else advanced the counter between our read
                    // and this write: same signed response racing itself,
                    // or a clone racing the legitimate authenticator.
                    tracing::warn!(
                        credential_id = %credential.credential_id,
                        "Conditional counter update lost"
                    );
                    return Err(CeremonyError::ReplayOrCloneSuspected);
                }
            }
            CounterOutcome::CounterlessOk => {
                tracing::debug!(
                    credential_id = %credential.credential_id,
                    "Authenticator does not implement counters"
                );
            }
            CounterOutcome::Regression => {
                tracing::warn!(
                    credential_id = %credential.credential_id,
                    stored = credential.sign_count,
                    reported = auth_data.counter,
                    "Counter regression"
                );
                return Err(CeremonyError::ReplayOrCloneSuspected);
            }
        }

        let token = self.issue_session(&user).await?;

        tracing::info!(user_id = %user.id, "Authentication ceremony completed");

        Ok(SignedIn { user, token })
    }
}

/// A provided user handle must match the stored credential. When
/// `require_handle` is set the handle must also be present.
fn verify_user_handle(
    response: &AuthenticatorResponse,
    credential: &StoredCredential,
    require_handle: bool,
) -> Result<(), CeremonyError> {
    match (&response.response.user_handle, require_handle) {
        (Some(handle), _) if *handle != credential.user_handle => {
            Err(CeremonyError::VerificationFailed(
                "User handle mismatch".to_string(),
            ))
        }
        (None, true) => Err(CeremonyError::VerificationFailed(
            "Missing user handle for discoverable credential".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Verify the assertion signature over
/// `authenticatorData || SHA-256(clientDataJSON)` with the stored key.
fn verify_signature(
    response: &AuthenticatorResponse,
    client_data: &ParsedClientData,
    auth_data: &AuthenticatorData,
    credential: &StoredCredential,
) -> Result<(), CeremonyError> {
    let public_key = base64url_decode(&credential.public_key)
        .map_err(|e| CeremonyError::StorageFailure(format!("Invalid stored public key: {e}")))?;
    let unparsed_public_key =
        UnparsedPublicKey::new(&ring::signature::ECDSA_P256_SHA256_ASN1, &public_key);

    let signature = base64url_decode(&response.response.signature)
        .map_err(|e| CeremonyError::MalformedRequest(format!("Invalid signature: {e}")))?;

    let client_data_hash = digest::digest(&digest::SHA256, &client_data.raw_data);
    let mut signed_data =
        Vec::with_capacity(auth_data.raw_data.len() + client_data_hash.as_ref().len());
    signed_data.extend_from_slice(&auth_data.raw_data);
    signed_data.extend_from_slice(client_data_hash.as_ref());

    unparsed_public_key
        .verify(&signed_data, &signature)
        .map_err(|_| CeremonyError::VerificationFailed("Signature verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::config::RpConfig;
    use crate::session::JwtSessionIssuer;
    use crate::store::{CredentialRepository, MemoryRepository, StoreError, User};
    use crate::test_utils::SoftAuthenticator;

    use super::super::types::RegistrationIdentity;

    const ORIGIN: &str = "https://example.com";
    const RP_ID: &str = "example.com";

    fn test_engine() -> (CeremonyEngine, Arc<MemoryRepository>) {
        let config = RpConfig::from_origin(ORIGIN, "Example").unwrap();
        let repo = Arc::new(MemoryRepository::new());
        let sessions = Arc::new(JwtSessionIssuer::new(b"test-secret"));
        (CeremonyEngine::new(config, repo.clone(), sessions), repo)
    }

    async fn register(engine: &CeremonyEngine, authenticator: &SoftAuthenticator, username: &str) {
        let options = engine
            .start_registration(RegistrationIdentity {
                username: username.to_string(),
                display_name: None,
                email: None,
            })
            .await
            .unwrap();
        let response =
            authenticator.registration_response(&options.challenge, ORIGIN, RP_ID, false);
        engine
            .finish_registration(response, &options.challenge)
            .await
            .unwrap();
    }

    async fn authenticate(
        engine: &CeremonyEngine,
        authenticator: &SoftAuthenticator,
        counter: u32,
    ) -> Result<SignedIn, CeremonyError> {
        let options = engine.start_authentication(None).await.unwrap();
        let response =
            authenticator.authentication_response(&options.challenge, ORIGIN, RP_ID, counter);
        engine
            .finish_authentication(response, &options.challenge)
            .await
    }

    #[test]
    fn test_counter_rule_examples() {
        assert_eq!(evaluate_counter(0, 1), CounterOutcome::Advance);
        assert_eq!(evaluate_counter(1, 1), CounterOutcome::Regression);
        assert_eq!(evaluate_counter(5, 3), CounterOutcome::Regression);
        assert_eq!(evaluate_counter(0, 0), CounterOutcome::CounterlessOk);
        assert_eq!(evaluate_counter(5, 0), CounterOutcome::Regression);
    }

    proptest! {
        #[test]
        fn prop_counter_rule(stored in any::<u32>(), reported in any::<u32>()) {
            let outcome = evaluate_counter(stored, reported);
            if reported > stored {
                prop_assert_eq!(outcome, CounterOutcome::Advance);
            } else if stored == 0 && reported == 0 {
                prop_assert_eq!(outcome, CounterOutcome::CounterlessOk);
            } else {
                prop_assert_eq!(outcome, CounterOutcome::Regression);
            }
        }
    }

    #[tokio::test]
    async fn test_allow_list_scoped_to_user() {
        let (engine, _) = test_engine();
        let first = SoftAuthenticator::new();
        register(&engine, &first, "alice").await;

        // Second credential for the same user, via the repository directly
        let second = SoftAuthenticator::new();
        {
            let user = engine
                .repository
                .find_user_by_username("alice")
                .await
                .unwrap()
                .unwrap();
            let existing = engine
                .repository
                .list_credentials_for_user(&user.id)
                .await
                .unwrap();
            let mut credential = existing[0].clone();
            credential.credential_id = second.credential_id.clone();
            engine.repository.insert_credential(credential).await.unwrap();
        }

        let options = engine.start_authentication(Some("alice")).await.unwrap();
        let ids: Vec<&str> = options
            .allow_credentials
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(options.allow_credentials.len(), 2);
        assert!(ids.contains(&first.credential_id.as_str()));
        assert!(ids.contains(&second.credential_id.as_str()));
        assert!(options.allow_credentials.iter().all(|c| c.type_ == "public-key"));
    }

    #[tokio::test]
    async fn test_unknown_username_gives_empty_allow_list() {
        let (engine, _) = test_engine();
        let options = engine.start_authentication(Some("nobody")).await.unwrap();
        assert!(options.allow_credentials.is_empty());

        let options = engine.start_authentication(None).await.unwrap();
        assert!(options.allow_credentials.is_empty());
    }

    struct BrokenRepository;

    #[async_trait::async_trait]
    impl CredentialRepository for BrokenRepository {
        async fn find_user_by_username(&self, _: &str) -> Result<Option<User>, StoreError> {
            Err(StoreError::Storage("down".to_string()))
        }
        async fn list_credentials_for_user(
            &self,
            _: &str,
        ) -> Result<Vec<crate::store::StoredCredential>, StoreError> {
            Err(StoreError::Storage("down".to_string()))
        }
        async fn find_credential_by_id(
            &self,
            _: &str,
        ) -> Result<Option<(crate::store::StoredCredential, User)>, StoreError> {
            Err(StoreError::Storage("down".to_string()))
        }
        async fn insert_user(&self, _: User) -> Result<(), StoreError> {
            Err(StoreError::Storage("down".to_string()))
        }
        async fn insert_credential(
            &self,
            _: crate::store::StoredCredential,
        ) -> Result<(), StoreError> {
            Err(StoreError::Storage("down".to_string()))
        }
        async fn delete_user(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Storage("down".to_string()))
        }
        async fn update_credential_counter(
            &self,
            _: &str,
            _: u32,
            _: u32,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Storage("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_degrades_to_empty_allow_list() {
        let config = RpConfig::from_origin(ORIGIN, "Example").unwrap();
        let engine = CeremonyEngine::new(
            config,
            Arc::new(BrokenRepository),
            Arc::new(JwtSessionIssuer::new(b"test-secret")),
        );

        let options = engine.start_authentication(Some("alice")).await.unwrap();
        assert!(options.allow_credentials.is_empty());
    }

    #[tokio::test]
    async fn test_register_then_authenticate_then_replay() {
        let (engine, repo) = test_engine();
        let authenticator = SoftAuthenticator::new();
        register(&engine, &authenticator, "alice").await;

        // Fresh login with counter 1 succeeds and persists the counter
        let signed_in = authenticate(&engine, &authenticator, 1).await.unwrap();
        assert_eq!(signed_in.user.username, "alice");
        let (credential, _) = repo
            .find_credential_by_id(&authenticator.credential_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(credential.sign_count, 1);

        // Same counter again on a fresh challenge: clone/replay suspected
        let result = authenticate(&engine, &authenticator, 1).await;
        assert!(matches!(result, Err(CeremonyError::ReplayOrCloneSuspected)));

        // Counter still 1, untouched by the failed attempt
        let (credential, _) = repo
            .find_credential_by_id(&authenticator.credential_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(credential.sign_count, 1);
    }

    #[tokio::test]
    async fn test_identical_response_replay_fails_at_challenge() {
        let (engine, _) = test_engine();
        let authenticator = SoftAuthenticator::new();
        register(&engine, &authenticator, "alice").await;

        let options = engine.start_authentication(None).await.unwrap();
        let response =
            authenticator.authentication_response(&options.challenge, ORIGIN, RP_ID, 1);
        engine
            .finish_authentication(response, &options.challenge)
            .await
            .unwrap();

        // Byte-identical replay: the challenge was already consumed
        let replay = authenticator.authentication_response(&options.challenge, ORIGIN, RP_ID, 1);
        let result = engine.finish_authentication(replay, &options.challenge).await;
        assert!(matches!(result, Err(CeremonyError::VerificationFailed(_))));
    }

    #[tokio::test]
    async fn test_counter_sequence_must_increase() {
        let (engine, _) = test_engine();
        let authenticator = SoftAuthenticator::new();
        register(&engine, &authenticator, "alice").await;

        authenticate(&engine, &authenticator, 1).await.unwrap();
        authenticate(&engine, &authenticator, 2).await.unwrap();
        authenticate(&engine, &authenticator, 5).await.unwrap();

        let regression = authenticate(&engine, &authenticator, 4).await;
        assert!(matches!(
            regression,
            Err(CeremonyError::ReplayOrCloneSuspected)
        ));
    }

    #[tokio::test]
    async fn test_counterless_authenticator_allowed() {
        let (engine, repo) = test_engine();
        let authenticator = SoftAuthenticator::new();
        register(&engine, &authenticator, "alice").await;

        // Registered with counter 0, authenticates with counter 0 twice
        authenticate(&engine, &authenticator, 0).await.unwrap();
        authenticate(&engine, &authenticator, 0).await.unwrap();

        let (credential, _) = repo
            .find_credential_by_id(&authenticator.credential_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(credential.sign_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_credential_not_found_no_mutation() {
        let (engine, repo) = test_engine();
        let registered = SoftAuthenticator::new();
        register(&engine, &registered, "alice").await;

        let stranger = SoftAuthenticator::new();
        let result = authenticate(&engine, &stranger, 1).await;
        assert!(matches!(result, Err(CeremonyError::CredentialNotFound)));

        let (credential, _) = repo
            .find_credential_by_id(&registered.credential_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(credential.sign_count, 0);
    }

    #[tokio::test]
    async fn test_user_handle_mismatch_rejected() {
        let (engine, _) = test_engine();
        let authenticator = SoftAuthenticator::new().with_user_handle("not-the-stored-handle");
        register(&engine, &authenticator, "alice").await;

        let result = authenticate(&engine, &authenticator, 1).await;
        assert!(matches!(result, Err(CeremonyError::VerificationFailed(_))));
    }

    #[tokio::test]
    async fn test_backup_eligible_assertion_requires_user_handle() {
        let (engine, _) = test_engine();
        let authenticator = SoftAuthenticator::new().backup_eligible();
        register(&engine, &authenticator, "alice").await;

        let result = authenticate(&engine, &authenticator, 1).await;
        assert!(matches!(result, Err(CeremonyError::VerificationFailed(_))));
    }

    #[tokio::test]
    async fn test_matching_user_handle_accepted() {
        let (engine, repo) = test_engine();
        let authenticator = SoftAuthenticator::new();
        register(&engine, &authenticator, "alice").await;

        let (credential, _) = repo
            .find_credential_by_id(&authenticator.credential_id)
            .await
            .unwrap()
            .unwrap();

        // The handle is not covered by the signature, so it can be set
        // on the finished assertion.
        let options = engine.start_authentication(None).await.unwrap();
        let mut response =
            authenticator.authentication_response(&options.challenge, ORIGIN, RP_ID, 1);
        response.response.user_handle = Some(credential.user_handle.clone());
        let signed_in = engine
            .finish_authentication(response, &options.challenge)
            .await
            .unwrap();
        assert_eq!(signed_in.user.username, "alice");
    }

    #[tokio::test]
    async fn test_signature_from_wrong_key_rejected() {
        let (engine, _) = test_engine();
        let authenticator = SoftAuthenticator::new();
        register(&engine, &authenticator, "alice").await;

        // Another key signing while claiming the registered credential id
        let imposter = SoftAuthenticator::with_credential_id(&authenticator.credential_id);
        let result = authenticate(&engine, &imposter, 1).await;
        assert!(matches!(result, Err(CeremonyError::VerificationFailed(_))));
    }

    #[tokio::test]
    async fn test_rp_id_mismatch_rejected() {
        let (engine, _) = test_engine();
        let authenticator = SoftAuthenticator::new();
        register(&engine, &authenticator, "alice").await;

        let options = engine.start_authentication(None).await.unwrap();
        let response =
            authenticator.authentication_response(&options.challenge, ORIGIN, "other.example", 1);
        let result = engine.finish_authentication(response, &options.challenge).await;
        assert!(matches!(result, Err(CeremonyError::VerificationFailed(_))));
    }

    #[tokio::test]
    async fn test_malformed_assertion_fails_fast() {
        let (engine, _) = test_engine();
        let authenticator = SoftAuthenticator::new();
        register(&engine, &authenticator, "alice").await;

        let options = engine.start_authentication(None).await.unwrap();
        let mut response =
            authenticator.authentication_response(&options.challenge, ORIGIN, RP_ID, 1);
        response.response.signature = String::new();
        let result = engine.finish_authentication(response, &options.challenge).await;
        assert!(matches!(result, Err(CeremonyError::MalformedRequest(_))));
    }
}
