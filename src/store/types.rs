use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user identity.
///
/// Created exactly once, at the first successful registration ceremony.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// Opaque unique identifier assigned by the engine
    pub id: String,
    /// Unique, case-sensitive login name
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        id: String,
        username: String,
        email: Option<String>,
        display_name: Option<String>,
    ) -> Self {
        Self {
            id,
            username,
            email,
            display_name,
            created_at: Utc::now(),
        }
    }
}

/// Whether the credential is bound to a single authenticator or can be
/// synced/backed up across devices. Reported by the BE flag at registration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeviceType {
    SingleDevice,
    MultiDevice,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleDevice => "singleDevice",
            Self::MultiDevice => "multiDevice",
        }
    }

    pub(crate) fn from_str_or_default(s: &str) -> Self {
        match s {
            "multiDevice" => Self::MultiDevice,
            _ => Self::SingleDevice,
        }
    }
}

/// One registered passkey, bound to exactly one user.
///
/// `public_key` is the uncompressed P-256 point (0x04||x||y) base64url
/// encoded; `sign_count` is the authenticator-reported signature counter
/// used to detect cloned credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredCredential {
    /// Base64url credential id, globally unique, the lookup key
    pub credential_id: String,
    /// Owning user's id
    pub user_id: String,
    pub public_key: String,
    pub sign_count: u32,
    pub device_type: DeviceType,
    pub backed_up: bool,
    /// Advisory transport hints (usb, nfc, ble, internal, hybrid)
    pub transports: Vec<String>,
    /// WebAuthn user handle generated at registration
    pub user_handle: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
