//! Bearer credentials
//!
//! Every endpoint requires a signed bearer token binding the caller to a
//! `(tenant, exam schedule, user, attempt)` identity. Tokens are compact
//! JWTs signed with Ed25519; the verifier resolves keys from a static file
//! or a rotating key-set addressed by `kid`.
//!
//! Components:
//! - `claims`: the identity tuple extracted from a verified token.
//! - `verifier`: signature check, expiry check, claim extraction.
//! - `dev_issuer`: development-only token minting, gated on the profile.

pub mod claims;
pub mod dev_issuer;
pub mod verifier;

pub use claims::Claims;
pub use dev_issuer::DevTokenIssuer;
pub use verifier::CredentialVerifier;
