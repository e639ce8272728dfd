//! Credential issuance.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::info;
use url::Url;

use super::credential::EdgeCredential;
use super::policy::{AccessPolicy, IpRange, ResourceScope};
use super::signer::PolicySigner;
use crate::error::TokenError;

/// Fixed credential lifetime.
pub const CREDENTIAL_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Identity established by the session layer (logged, never signed)
    pub id: String,
}

impl Principal {
    /// Create a principal with the given identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A freshly signed credential with its decoded policy.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredential {
    /// The three transport-ready pieces
    pub credential: EdgeCredential,

    /// Pattern the credential is valid for
    pub resource: String,

    /// Lifetime from issuance
    #[serde(serialize_with = "serialize_secs")]
    pub expires_in: Duration,

    /// Expiry instant (Unix seconds)
    pub expires_at: u64,

    /// Policy that was signed
    #[serde(skip)]
    pub policy: AccessPolicy,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// Builds, signs and encodes access policies.
///
/// Holds no mutable state; the same issuer can serve concurrent requests.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    signer: PolicySigner,
    distribution: Url,
}

impl TokenIssuer {
    /// Create an issuer signing for the CDN distribution at `distribution`.
    pub fn new(signer: PolicySigner, distribution: Url) -> Self {
        Self {
            signer,
            distribution,
        }
    }

    /// Base URL of the distribution credentials are scoped to.
    pub fn distribution(&self) -> &Url {
        &self.distribution
    }

    /// Identifier of the signing key pair.
    pub fn key_pair_id(&self) -> &str {
        self.signer.key_pair_id()
    }

    /// Issue a credential for `principal` valid from now.
    pub fn issue(
        &self,
        principal: &Principal,
        scope: &ResourceScope,
    ) -> Result<IssuedCredential, TokenError> {
        self.issue_at(principal, scope, None, SystemTime::now())
    }

    /// Issue a credential as of `now`, optionally restricted to a source range.
    ///
    /// The credential is assembled only after signing succeeds; on error no
    /// credential material exists.
    pub fn issue_at(
        &self,
        principal: &Principal,
        scope: &ResourceScope,
        source_ip: Option<IpRange>,
        now: SystemTime,
    ) -> Result<IssuedCredential, TokenError> {
        let issued_at = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let expires_at = issued_at + CREDENTIAL_TTL.as_secs();

        let mut policy = AccessPolicy::new(scope.pattern(&self.distribution), expires_at);
        if let Some(range) = source_ip {
            policy = policy.with_source_ip(range);
        }

        let canonical = policy.canonical_bytes()?;
        let signature = self.signer.sign(&canonical)?;
        let credential = EdgeCredential::encode(&canonical, &signature, self.signer.key_pair_id());

        info!(
            principal = %principal.id,
            key_pair_id = %self.signer.key_pair_id(),
            resource = %policy.resource,
            expires_at,
            "Issued edge credential"
        );

        Ok(IssuedCredential {
            credential,
            resource: policy.resource.clone(),
            expires_in: CREDENTIAL_TTL,
            expires_at,
            policy,
        })
    }
}
