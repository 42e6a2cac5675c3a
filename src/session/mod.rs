mod errors;
mod issuer;

pub use errors::SessionError;
pub use issuer::{JwtSessionIssuer, SessionClaims, SessionIssuer};
