use std::time::Duration;

/// Local user-verification requirement (PIN, biometric) enforced by the
/// authenticator, as requested by the relying party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserVerificationPolicy {
    Required,
    Preferred,
    Discouraged,
}

impl UserVerificationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Preferred => "preferred",
            Self::Discouraged => "discouraged",
        }
    }
}

/// Immutable relying-party trust configuration.
///
/// Constructed once and injected into the ceremony engine; both verifiers
/// bind every response to `rp_id` and `origin` from this struct. There is
/// no ambient/environment state.
#[derive(Debug, Clone)]
pub struct RpConfig {
    /// RP ID, typically the effective domain of `origin`.
    pub rp_id: String,
    /// Human-readable relying party name shown by authenticator UIs.
    pub rp_name: String,
    /// Exact origin the client must report in clientDataJSON.
    pub origin: String,
    pub user_verification: UserVerificationPolicy,
    /// How long an issued challenge stays redeemable.
    pub challenge_ttl: Duration,
    /// Client-side ceremony timeout advertised in the options.
    pub timeout: Duration,
}

impl RpConfig {
    /// Build a configuration from an origin URL, deriving the RP ID from
    /// its host (e.g. `https://app.example.com:8443` -> `app.example.com`).
    pub fn from_origin(origin: &str, rp_name: &str) -> Result<Self, InvalidOrigin> {
        let url = url::Url::parse(origin).map_err(|_| InvalidOrigin(origin.to_string()))?;
        if !matches!(url.scheme(), "https" | "http") {
            return Err(InvalidOrigin(origin.to_string()));
        }
        let rp_id = url
            .host_str()
            .ok_or_else(|| InvalidOrigin(origin.to_string()))?
            .to_string();

        Ok(Self {
            rp_id,
            rp_name: rp_name.to_string(),
            origin: origin.trim_end_matches('/').to_string(),
            user_verification: UserVerificationPolicy::Preferred,
            challenge_ttl: Duration::from_secs(300),
            timeout: Duration::from_secs(60),
        })
    }

    pub fn with_user_verification(mut self, policy: UserVerificationPolicy) -> Self {
        self.user_verification = policy;
        self
    }

    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid origin: {0}")]
pub struct InvalidOrigin(pub String);
