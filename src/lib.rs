//! passkey-rp - WebAuthn/FIDO2 ceremony engine for relying parties
//!
//! This crate implements the server side of passkey registration and
//! authentication: challenge issuance, cryptographic response
//! verification, replay protection via signature counters, and the
//! credential/session lifecycle around them. HTTP routing, cookie
//! transport and UI are the embedding application's concern; the engine
//! speaks through the [`CeremonyEngine`] methods and two injected
//! boundaries, [`CredentialRepository`] and [`SessionIssuer`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use passkey_rp::{CeremonyEngine, JwtSessionIssuer, MemoryRepository, RpConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RpConfig::from_origin("https://example.com", "Example App")?;
//! let engine = CeremonyEngine::new(
//!     config,
//!     Arc::new(MemoryRepository::new()),
//!     Arc::new(JwtSessionIssuer::new(b"change-me")),
//! );
//!
//! let options = engine.start_authentication(Some("alice")).await?;
//! // hand `options` to the browser, get the signed assertion back, then:
//! // engine.finish_authentication(assertion, &options.challenge).await?;
//! # Ok(())
//! # }
//! ```

mod ceremony;
mod config;
mod session;
mod store;
mod utils;

#[cfg(test)]
mod test_utils;

pub use ceremony::{
    AllowCredential, AuthenticationOptions, AuthenticatorAssertionResponse,
    AuthenticatorAttestationResponse, AuthenticatorResponse, AuthenticatorSelection,
    CeremonyEngine, CeremonyError, PubKeyCredParam, PublicKeyCredentialUserEntity,
    RegisterCredential, RegistrationIdentity, RegistrationOptions, RelyingParty, SignedIn,
};
pub use config::{InvalidOrigin, RpConfig, UserVerificationPolicy};
pub use session::{JwtSessionIssuer, SessionClaims, SessionError, SessionIssuer};
pub use store::{
    CredentialRepository, DeviceType, MemoryRepository, SqliteRepository, StoreError,
    StoredCredential, User,
};
pub use utils::{UtilError, gen_random_string};
