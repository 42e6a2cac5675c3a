//! Software authenticator for tests.
//!
//! Builds genuinely signed registration and authentication responses with
//! a real ECDSA P-256 key pair, so ceremony tests exercise the same
//! verification paths a hardware authenticator would.

use ciborium::value::{Integer, Value as CborValue};
use ring::digest;
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair};

use crate::ceremony::types::auth_data_flags;
use crate::ceremony::{
    AuthenticatorAssertionResponse, AuthenticatorAttestationResponse, AuthenticatorResponse,
    RegisterCredential,
};
use crate::utils::base64url_encode;

pub(crate) struct SoftAuthenticator {
    key_pair: EcdsaKeyPair,
    rng: SystemRandom,
    credential_id_bytes: Vec<u8>,
    /// Base64url credential id, as it appears on the wire and in storage
    pub(crate) credential_id: String,
    /// User handle to place in assertions, if any
    user_handle: Option<String>,
    /// Set the BE flag on assertions
    backup_eligible: bool,
}

impl SoftAuthenticator {
    pub(crate) fn new() -> Self {
        let rng = SystemRandom::new();
        let mut id_bytes = [0u8; 16];
        ring::rand::SecureRandom::fill(&rng, &mut id_bytes).expect("rng");
        Self::build(id_bytes.to_vec())
    }

    /// A fresh key pair claiming someone else's credential id.
    pub(crate) fn with_credential_id(credential_id: &str) -> Self {
        use base64::Engine as _;
        let id_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(credential_id)
            .expect("credential id");
        Self::build(id_bytes)
    }

    fn build(credential_id_bytes: Vec<u8>) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 =
            EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).expect("keygen");
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
            .expect("keypair");
        let credential_id = base64url_encode(credential_id_bytes.clone());
        Self {
            key_pair,
            rng,
            credential_id_bytes,
            credential_id,
            user_handle: None,
            backup_eligible: false,
        }
    }

    /// Report this user handle in assertions.
    pub(crate) fn with_user_handle(mut self, handle: &str) -> Self {
        self.user_handle = Some(handle.to_string());
        self
    }

    /// Mark assertions as coming from a backup-eligible credential.
    pub(crate) fn backup_eligible(mut self) -> Self {
        self.backup_eligible = true;
        self
    }

    fn client_data(&self, type_: &str, challenge: &str, origin: &str) -> Vec<u8> {
        serde_json::json!({
            "type": type_,
            "challenge": challenge,
            "origin": origin,
            "crossOrigin": false,
        })
        .to_string()
        .into_bytes()
    }

    /// COSE_Key (EC2, P-256, ES256) for this key pair.
    fn cose_public_key(&self) -> Vec<u8> {
        // Uncompressed point: 0x04 || x || y
        let point = self.key_pair.public_key().as_ref();
        assert_eq!(point.len(), 65);
        let x = point[1..33].to_vec();
        let y = point[33..65].to_vec();

        let map = CborValue::Map(vec![
            (CborValue::Integer(Integer::from(1)), CborValue::Integer(Integer::from(2))),
            (CborValue::Integer(Integer::from(3)), CborValue::Integer(Integer::from(-7))),
            (CborValue::Integer(Integer::from(-1)), CborValue::Integer(Integer::from(1))),
            (CborValue::Integer(Integer::from(-2)), CborValue::Bytes(x)),
            (CborValue::Integer(Integer::from(-3)), CborValue::Bytes(y)),
        ]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&map, &mut out).expect("cose cbor");
        out
    }

    fn auth_data_header(rp_id: &str, flags: u8, counter: u32) -> Vec<u8> {
        let mut data = digest::digest(&digest::SHA256, rp_id.as_bytes())
            .as_ref()
            .to_vec();
        data.push(flags);
        data.extend_from_slice(&counter.to_be_bytes());
        data
    }

    /// A signed `navigator.credentials.create()` response for the given
    /// challenge, reporting an initial counter of zero.
    pub(crate) fn registration_response(
        &self,
        challenge: &str,
        origin: &str,
        rp_id: &str,
        user_verified: bool,
    ) -> RegisterCredential {
        let mut flags = auth_data_flags::UP | auth_data_flags::AT;
        if user_verified {
            flags |= auth_data_flags::UV;
        }

        let mut auth_data = Self::auth_data_header(rp_id, flags, 0);
        auth_data.extend_from_slice(&[0u8; 16]); // AAGUID
        auth_data.extend_from_slice(&(self.credential_id_bytes.len() as u16).to_be_bytes());
        auth_data.extend_from_slice(&self.credential_id_bytes);
        auth_data.extend_from_slice(&self.cose_public_key());

        let attestation = CborValue::Map(vec![
            (
                CborValue::Text("fmt".to_string()),
                CborValue::Text("none".to_string()),
            ),
            (CborValue::Text("attStmt".to_string()), CborValue::Map(vec![])),
            (
                CborValue::Text("authData".to_string()),
                CborValue::Bytes(auth_data),
            ),
        ]);
        let mut attestation_bytes = Vec::new();
        ciborium::ser::into_writer(&attestation, &mut attestation_bytes).expect("attestation cbor");

        let client_data = self.client_data("webauthn.create", challenge, origin);

        RegisterCredential {
            id: self.credential_id.clone(),
            raw_id: self.credential_id.clone(),
            type_: "public-key".to_string(),
            response: AuthenticatorAttestationResponse {
                client_data_json: base64url_encode(client_data),
                attestation_object: base64url_encode(attestation_bytes),
                transports: vec!["internal".to_string()],
            },
        }
    }

    /// A signed `navigator.credentials.get()` assertion for the given
    /// challenge and counter value.
    pub(crate) fn authentication_response(
        &self,
        challenge: &str,
        origin: &str,
        rp_id: &str,
        counter: u32,
    ) -> AuthenticatorResponse {
        let mut flags = auth_data_flags::UP;
        if self.backup_eligible {
            flags |= auth_data_flags::BE;
        }
        let auth_data = Self::auth_data_header(rp_id, flags, counter);
        let client_data = self.client_data("webauthn.get", challenge, origin);

        let client_data_hash = digest::digest(&digest::SHA256, &client_data);
        let mut signed_data = auth_data.clone();
        signed_data.extend_from_slice(client_data_hash.as_ref());

        let signature = self
            .key_pair
            .sign(&self.rng, &signed_data)
            .expect("sign")
            .as_ref()
            .to_vec();

        AuthenticatorResponse {
            id: self.credential_id.clone(),
            raw_id: self.credential_id.clone(),
            type_: "public-key".to_string(),
            response: AuthenticatorAssertionResponse {
                client_data_json: base64url_encode(client_data),
                authenticator_data: base64url_encode(auth_data),
                signature: base64url_encode(signature),
                user_handle: self.user_handle.clone(),
            },
        }
    }
}
