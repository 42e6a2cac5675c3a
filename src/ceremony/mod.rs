mod auth;
mod challenge;
mod engine;
mod errors;
mod register;
pub(crate) mod types;

pub use engine::CeremonyEngine;
pub use errors::CeremonyError;
pub use types::{
    AllowCredential, AuthenticationOptions, AuthenticatorAssertionResponse,
    AuthenticatorAttestationResponse, AuthenticatorResponse, AuthenticatorSelection,
    PubKeyCredParam, PublicKeyCredentialUserEntity, RegisterCredential, RegistrationIdentity,
    RegistrationOptions, RelyingParty, SignedIn,
};
