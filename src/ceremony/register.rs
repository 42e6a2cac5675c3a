use chrono::Utc;
use ciborium::value::{Integer, Value as CborValue};

use crate::store::{DeviceType, StoreError, StoredCredential, User};
use crate::utils::{base64url_decode, base64url_encode};

use super::challenge::{CeremonyKind, PendingIdentity};
use super::engine::CeremonyEngine;
use super::errors::CeremonyError;
use super::types::{
    AttestationObject, AuthenticatorData, AuthenticatorSelection, ParsedClientData,
    PubKeyCredParam, PublicKeyCredentialUserEntity, RegisterCredential, RegistrationIdentity,
    RegistrationOptions, RelyingParty, SignedIn,
};

impl CeremonyEngine {
    /// Begin a registration ceremony: issue a fresh challenge bound to the
    /// pending identity and return `navigator.credentials.create()` options.
    pub async fn start_registration(
        &self,
        identity: RegistrationIdentity,
    ) -> Result<RegistrationOptions, CeremonyError> {
        if identity.username.is_empty() {
            return Err(CeremonyError::MalformedRequest(
                "Username is required".to_string(),
            ));
        }

        let user_handle = Self::gen_user_handle()?;
        let display_name = identity
            .display_name
            .clone()
            .unwrap_or_else(|| identity.username.clone());

        let pending = PendingIdentity {
            user_handle: user_handle.clone(),
            username: identity.username.clone(),
            display_name: identity.display_name,
            email: identity.email,
        };

        let challenge = self
            .challenges
            .issue(
                CeremonyKind::Registration,
                Some(pending),
                self.config.challenge_ttl,
            )
            .await?;

        let options = RegistrationOptions {
            challenge,
            rp: RelyingParty {
                name: self.config.rp_name.clone(),
                id: self.config.rp_id.clone(),
            },
            user: PublicKeyCredentialUserEntity {
                user_handle,
                name: identity.username,
                display_name,
            },
            pub_key_cred_params: vec![
                PubKeyCredParam {
                    type_: "public-key".to_string(),
                    alg: -7,
                },
                PubKeyCredParam {
                    type_: "public-key".to_string(),
                    alg: -257,
                },
            ],
            authenticator_selection: AuthenticatorSelection {
                resident_key: "preferred".to_string(),
                require_resident_key: false,
                user_verification: self.config.user_verification.as_str().to_string(),
            },
            timeout: self.config.timeout.as_millis() as u64,
            attestation: "none".to_string(),
        };

        tracing::debug!(username = %options.user.name, "Registration options issued");

        Ok(options)
    }

    /// Complete a registration ceremony.
    ///
    /// Verifies the attestation response against the previously issued
    /// challenge, extracts the new credential, and persists user plus
    /// credential atomically: if the credential insert fails after the
    /// user insert, the user row is deleted again so no credential-less
    /// user is ever observable as a successful outcome.
    pub async fn finish_registration(
        &self,
        reg_data: RegisterCredential,
        expected_challenge: &str,
    ) -> Result<SignedIn, CeremonyError> {
        reg_data.validate()?;

        let pending = self
            .challenges
            .consume(CeremonyKind::Registration, expected_challenge)
            .await?;
        let identity = pending.identity.ok_or_else(|| {
            CeremonyError::VerificationFailed("Challenge carries no pending identity".to_string())
        })?;

        let client_data = ParsedClientData::from_base64(&reg_data.response.client_data_json)?;
        client_data.verify(&self.config, &pending.challenge, "webauthn.create")?;

        let attestation = parse_attestation_object(&reg_data.response.attestation_object)?;
        let auth_data = AuthenticatorData::from_bytes(attestation.auth_data.clone())?;
        auth_data.verify(&self.config)?;

        if !auth_data.has_attested_credential_data() {
            return Err(CeremonyError::VerificationFailed(
                "No attested credential data present".to_string(),
            ));
        }

        // Attestation-chain trust is out of scope; fmt/attStmt are parsed
        // and then ignored, equivalent to "none" attestation handling.
        tracing::debug!(
            fmt = %attestation.fmt,
            att_stmt_entries = attestation.att_stmt.len(),
            "Skipping attestation statement evaluation"
        );

        let public_key = extract_public_key_from_auth_data(&attestation.auth_data)?;

        let device_type = if auth_data.is_backup_eligible() {
            DeviceType::MultiDevice
        } else {
            DeviceType::SingleDevice
        };

        let user = User::new(
            Self::gen_user_id()?,
            identity.username,
            identity.email,
            identity.display_name,
        );

        self.repository
            .insert_user(user.clone())
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => {
                    tracing::warn!(username = %user.username, "Registration for taken username");
                    CeremonyError::UserCreationConflict(user.username.clone())
                }
                StoreError::Storage(msg) => CeremonyError::StorageFailure(msg),
            })?;

        let now = Utc::now();
        let credential = StoredCredential {
            credential_id: reg_data.raw_id.clone(),
            user_id: user.id.clone(),
            public_key,
            sign_count: auth_data.counter,
            device_type,
            backed_up: auth_data.is_backed_up(),
            transports: reg_data.response.transports.clone(),
            user_handle: identity.user_handle,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.repository.insert_credential(credential).await {
            // Compensating rollback: never leave a user without any credential
            if let Err(del_err) = self.repository.delete_user(&user.id).await {
                tracing::error!(
                    user_id = %user.id,
                    error = %del_err,
                    "Rollback of orphaned user failed"
                );
            }
            return Err(CeremonyError::StorageFailure(format!(
                "Failed to store credential: {e}"
            )));
        }

        let token = self.issue_session(&user).await?;

        tracing::info!(user_id = %user.id, "Registration ceremony completed");

        Ok(SignedIn { user, token })
    }
}

fn parse_attestation_object(attestation_base64: &str) -> Result<AttestationObject, CeremonyError> {
    let attestation_bytes = base64url_decode(attestation_base64).map_err(|e| {
        CeremonyError::MalformedRequest(format!("Failed to decode attestation object: {e}"))
    })?;

    let attestation_cbor: CborValue = ciborium::de::from_reader(&attestation_bytes[..])
        .map_err(|e| CeremonyError::MalformedRequest(format!("Invalid CBOR data: {e}")))?;

    let CborValue::Map(map) = attestation_cbor else {
        return Err(CeremonyError::MalformedRequest(
            "Invalid attestation format".to_string(),
        ));
    };

    let mut fmt = None;
    let mut auth_data = None;
    let mut att_stmt = None;

    for (key, value) in map {
        if let CborValue::Text(k) = key {
            match k.as_str() {
                "fmt" => {
                    if let CborValue::Text(f) = value {
                        fmt = Some(f);
                    }
                }
                "authData" => {
                    if let CborValue::Bytes(data) = value {
                        auth_data = Some(data);
                    }
                }
                "attStmt" => {
                    if let CborValue::Map(stmt) = value {
                        att_stmt = Some(stmt);
                    }
                }
                _ => {}
            }
        }
    }

    match (fmt, auth_data, att_stmt) {
        (Some(fmt), Some(auth_data), Some(att_stmt)) => Ok(AttestationObject {
            fmt,
            auth_data,
            att_stmt,
        }),
        _ => Err(CeremonyError::MalformedRequest(
            "Missing required attestation data".to_string(),
        )),
    }
}

/// Extract the new credential's P-256 public key from the attested
/// credential data, re-encoded as an uncompressed point (0x04||x||y).
fn extract_public_key_from_auth_data(auth_data: &[u8]) -> Result<String, CeremonyError> {
    let credential_data = parse_credential_data(auth_data)?;
    let (x_coord, y_coord) = extract_key_coordinates(credential_data)?;

    let mut public_key = Vec::with_capacity(65);
    public_key.push(0x04);
    public_key.extend_from_slice(&x_coord);
    public_key.extend_from_slice(&y_coord);

    Ok(base64url_encode(public_key))
}

fn parse_credential_data(auth_data: &[u8]) -> Result<&[u8], CeremonyError> {
    let mut pos = 37; // RP ID hash (32) + flags (1) + counter (4)

    if auth_data.len() < pos + 18 {
        return Err(CeremonyError::MalformedRequest(
            "Authenticator data too short".to_string(),
        ));
    }

    pos += 16; // AAGUID

    let cred_id_len = ((auth_data[pos] as usize) << 8) | (auth_data[pos + 1] as usize);
    pos += 2;

    if cred_id_len == 0 || cred_id_len > 1024 {
        return Err(CeremonyError::MalformedRequest(
            "Invalid credential ID length".to_string(),
        ));
    }

    if auth_data.len() < pos + cred_id_len {
        return Err(CeremonyError::MalformedRequest(
            "Authenticator data too short for credential ID".to_string(),
        ));
    }

    pos += cred_id_len;

    Ok(&auth_data[pos..])
}

fn extract_key_coordinates(credential_data: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CeremonyError> {
    let public_key_cbor: CborValue = ciborium::de::from_reader(credential_data)
        .map_err(|e| CeremonyError::MalformedRequest(format!("Invalid public key CBOR: {e}")))?;

    let CborValue::Map(map) = public_key_cbor else {
        return Err(CeremonyError::MalformedRequest(
            "Invalid public key format".to_string(),
        ));
    };

    let mut x_coord = None;
    let mut y_coord = None;

    for (key, value) in map {
        if let CborValue::Integer(i) = key {
            if i == Integer::from(-2) {
                if let CborValue::Bytes(x) = value {
                    x_coord = Some(x);
                }
            } else if i == Integer::from(-3) {
                if let CborValue::Bytes(y) = value {
                    y_coord = Some(y);
                }
            }
        }
    }

    match (x_coord, y_coord) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(CeremonyError::MalformedRequest(
            "Missing or invalid key coordinates".to_string(),
        )),
    }
}
