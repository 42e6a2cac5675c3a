use ring::digest;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::config::RpConfig;
use crate::store::User;
use crate::utils::base64url_decode;

use super::errors::CeremonyError;

/// Identity hints supplied by the caller when starting a registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationIdentity {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialUserEntity {
    /// WebAuthn user handle, serialized as `id`
    #[serde(rename = "id")]
    pub user_handle: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct RelyingParty {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct PubKeyCredParam {
    #[serde(rename = "type")]
    pub type_: String,
    pub alg: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub resident_key: String,
    pub require_resident_key: bool,
    pub user_verification: String,
}

/// Options returned to the client for `navigator.credentials.create()`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub challenge: String,
    pub rp: RelyingParty,
    pub user: PublicKeyCredentialUserEntity,
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    pub authenticator_selection: AuthenticatorSelection,
    /// Milliseconds
    pub timeout: u64,
    pub attestation: String,
}

/// One entry of the authentication allow-list: a credential the named
/// user may answer with, plus its advisory transport hints.
#[derive(Debug, Serialize, PartialEq)]
pub struct AllowCredential {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<String>,
}

/// Options returned to the client for `navigator.credentials.get()`.
///
/// An empty `allow_credentials` list signals that any discoverable
/// credential may attempt to sign in (passkey flow).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    pub challenge: String,
    /// Milliseconds
    pub timeout: u64,
    pub rp_id: String,
    pub allow_credentials: Vec<AllowCredential>,
    pub user_verification: String,
}

/// Signed response from the browser after credential creation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCredential {
    pub(crate) id: String,
    pub(crate) raw_id: String,
    #[serde(rename = "type")]
    pub(crate) type_: String,
    pub(crate) response: AuthenticatorAttestationResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAttestationResponse {
    pub(crate) client_data_json: String,
    pub(crate) attestation_object: String,
    #[serde(default)]
    pub(crate) transports: Vec<String>,
}

impl RegisterCredential {
    /// Field-presence validation before any cryptographic work.
    pub(crate) fn validate(&self) -> Result<(), CeremonyError> {
        if self.type_ != "public-key" {
            return Err(CeremonyError::MalformedRequest(format!(
                "Unexpected credential type: {}",
                self.type_
            )));
        }
        if self.id.is_empty() || self.raw_id.is_empty() {
            return Err(CeremonyError::MalformedRequest(
                "Missing credential id".to_string(),
            ));
        }
        if self.response.client_data_json.is_empty() || self.response.attestation_object.is_empty()
        {
            return Err(CeremonyError::MalformedRequest(
                "Missing attestation response fields".to_string(),
            ));
        }
        Ok(())
    }
}

/// Signed assertion from the browser during authentication.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorResponse {
    pub(crate) id: String,
    pub(crate) raw_id: String,
    #[serde(rename = "type")]
    pub(crate) type_: String,
    pub(crate) response: AuthenticatorAssertionResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAssertionResponse {
    pub(crate) client_data_json: String,
    pub(crate) authenticator_data: String,
    pub(crate) signature: String,
    #[serde(default)]
    pub(crate) user_handle: Option<String>,
}

impl AuthenticatorResponse {
    pub(crate) fn validate(&self) -> Result<(), CeremonyError> {
        if self.type_ != "public-key" {
            return Err(CeremonyError::MalformedRequest(format!(
                "Unexpected credential type: {}",
                self.type_
            )));
        }
        if self.id.is_empty() || self.raw_id.is_empty() {
            return Err(CeremonyError::MalformedRequest(
                "Missing credential id".to_string(),
            ));
        }
        if self.response.client_data_json.is_empty()
            || self.response.authenticator_data.is_empty()
            || self.response.signature.is_empty()
        {
            return Err(CeremonyError::MalformedRequest(
                "Missing assertion response fields".to_string(),
            ));
        }
        Ok(())
    }
}

/// Successful outcome of a completed ceremony: the verified user identity
/// and a freshly minted session token.
#[derive(Debug)]
pub struct SignedIn {
    pub user: User,
    pub token: String,
}

/// Decoded CBOR attestation object from a registration response.
#[derive(Debug)]
pub(crate) struct AttestationObject {
    pub(crate) fmt: String,
    pub(crate) auth_data: Vec<u8>,
    pub(crate) att_stmt: Vec<(ciborium::value::Value, ciborium::value::Value)>,
}

/// clientDataJSON, decoded and parsed.
#[derive(Debug)]
pub(crate) struct ParsedClientData {
    pub(crate) challenge: String,
    pub(crate) origin: String,
    pub(crate) type_: String,
    pub(crate) raw_data: Vec<u8>,
}

impl ParsedClientData {
    pub(crate) fn from_base64(client_data_json: &str) -> Result<Self, CeremonyError> {
        let raw_data = base64url_decode(client_data_json)
            .map_err(|e| CeremonyError::MalformedRequest(format!("Failed to decode: {e}")))?;

        let data_str = String::from_utf8(raw_data.clone())
            .map_err(|e| CeremonyError::MalformedRequest(format!("Invalid UTF-8: {e}")))?;

        let data: serde_json::Value = serde_json::from_str(&data_str)
            .map_err(|e| CeremonyError::MalformedRequest(format!("Invalid JSON: {e}")))?;

        let challenge = data["challenge"]
            .as_str()
            .ok_or_else(|| CeremonyError::MalformedRequest("Missing challenge".into()))?
            .to_string();
        let origin = data["origin"]
            .as_str()
            .ok_or_else(|| CeremonyError::MalformedRequest("Missing origin".into()))?
            .to_string();
        let type_ = data["type"]
            .as_str()
            .ok_or_else(|| CeremonyError::MalformedRequest("Missing type".into()))?
            .to_string();

        Ok(Self {
            challenge,
            origin,
            type_,
            raw_data,
        })
    }

    /// Verify challenge (constant-time), origin and ceremony type
    /// (`webauthn.create` or `webauthn.get`).
    pub(crate) fn verify(
        &self,
        config: &RpConfig,
        expected_challenge: &str,
        expected_type: &str,
    ) -> Result<(), CeremonyError> {
        let challenge_matches: bool = self
            .challenge
            .as_bytes()
            .ct_eq(expected_challenge.as_bytes())
            .into();
        if !challenge_matches {
            return Err(CeremonyError::VerificationFailed(
                "Challenge mismatch".to_string(),
            ));
        }

        if self.origin != config.origin {
            return Err(CeremonyError::VerificationFailed(format!(
                "Invalid origin. Expected: {}, Got: {}",
                config.origin, self.origin
            )));
        }

        if self.type_ != expected_type {
            return Err(CeremonyError::VerificationFailed(format!(
                "Invalid type. Expected '{expected_type}', Got: {}",
                self.type_
            )));
        }

        Ok(())
    }
}

/// Authenticator data flag bits defined by WebAuthn Level 2
pub(crate) mod auth_data_flags {
    /// User Present (UP) - Bit 0
    pub(crate) const UP: u8 = 1 << 0;
    /// User Verified (UV) - Bit 2
    pub(crate) const UV: u8 = 1 << 2;
    /// Backup Eligibility (BE) - Bit 3
    pub(crate) const BE: u8 = 1 << 3;
    /// Backup State (BS) - Bit 4
    pub(crate) const BS: u8 = 1 << 4;
    /// Attested Credential Data Present - Bit 6
    pub(crate) const AT: u8 = 1 << 6;
}

/// Authenticator data structure shared by both ceremonies.
///
/// Wire format (minimum 37 bytes): RP ID hash (32) | flags (1) |
/// counter (4, big-endian) | optional attested credential data | extensions.
#[derive(Debug)]
pub(crate) struct AuthenticatorData {
    pub(crate) rp_id_hash: Vec<u8>,
    pub(crate) flags: u8,
    pub(crate) counter: u32,
    pub(crate) raw_data: Vec<u8>,
}

impl AuthenticatorData {
    pub(crate) fn from_base64(auth_data: &str) -> Result<Self, CeremonyError> {
        let data = base64url_decode(auth_data)
            .map_err(|e| CeremonyError::MalformedRequest(format!("Failed to decode: {e}")))?;
        Self::from_bytes(data)
    }

    pub(crate) fn from_bytes(data: Vec<u8>) -> Result<Self, CeremonyError> {
        if data.len() < 37 {
            return Err(CeremonyError::MalformedRequest(
                "Authenticator data too short".to_string(),
            ));
        }

        Ok(Self {
            rp_id_hash: data[..32].to_vec(),
            flags: data[32],
            counter: u32::from_be_bytes([data[33], data[34], data[35], data[36]]),
            raw_data: data,
        })
    }

    pub(crate) fn is_user_present(&self) -> bool {
        (self.flags & auth_data_flags::UP) != 0
    }

    pub(crate) fn is_user_verified(&self) -> bool {
        (self.flags & auth_data_flags::UV) != 0
    }

    /// BE flag: the credential is eligible for multi-device backup.
    pub(crate) fn is_backup_eligible(&self) -> bool {
        (self.flags & auth_data_flags::BE) != 0
    }

    pub(crate) fn is_backed_up(&self) -> bool {
        (self.flags & auth_data_flags::BS) != 0
    }

    pub(crate) fn has_attested_credential_data(&self) -> bool {
        (self.flags & auth_data_flags::AT) != 0
    }

    /// Verify RP ID hash, user presence and the user-verification policy.
    pub(crate) fn verify(&self, config: &RpConfig) -> Result<(), CeremonyError> {
        let expected_hash = digest::digest(&digest::SHA256, config.rp_id.as_bytes());
        if self.rp_id_hash != expected_hash.as_ref() {
            return Err(CeremonyError::VerificationFailed(
                "RP ID hash mismatch".to_string(),
            ));
        }

        if !self.is_user_present() {
            return Err(CeremonyError::VerificationFailed(
                "User not present".to_string(),
            ));
        }

        if config.user_verification == crate::config::UserVerificationPolicy::Required
            && !self.is_user_verified()
        {
            return Err(CeremonyError::VerificationFailed(format!(
                "User verification required but flag not set. Flags: {:02x}",
                self.flags
            )));
        }

        tracing::debug!(
            user_present = self.is_user_present(),
            user_verified = self.is_user_verified(),
            backup_eligible = self.is_backup_eligible(),
            backed_up = self.is_backed_up(),
            counter = self.counter,
            "Authenticator data verified"
        );

        Ok(())
    }
}
