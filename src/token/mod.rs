//! Signed edge credentials.
//!
//! Issues short-lived credentials that a CDN edge verifies with a public key,
//! without calling back to this service.
//!
//! # Flow
//!
//! ```text
//! Principal + ResourceScope
//!        │
//!        ▼
//!   AccessPolicy ──canonical_bytes──► PolicySigner (RSA-SHA256)
//!        │                                  │
//!        └──────────────┬───────────────────┘
//!                       ▼
//!                EdgeCredential
//!   CloudFront-Policy / CloudFront-Signature / CloudFront-Key-Pair-Id
//! ```
//!
//! Credentials are stateless and expire a fixed [`CREDENTIAL_TTL`] after
//! issuance. There is no server-side revocation.

mod credential;
pub mod encoding;
mod issuer;
mod policy;
mod signer;
mod verifier;

pub use credential::{
    CookieOptions, EdgeCredential, KEY_PAIR_ID_COOKIE, POLICY_COOKIE, SIGNATURE_COOKIE,
};
pub use issuer::{IssuedCredential, Principal, TokenIssuer, CREDENTIAL_TTL};
pub use policy::{wildcard_match, AccessPolicy, IpRange, ResourceScope};
pub use signer::{parse_private_key, KeySource, PolicySigner};
pub use verifier::EdgeVerifier;
