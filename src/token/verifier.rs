//! Edge-side credential verification.
//!
//! The CDN performs these checks itself; this implementation of the same
//! contract lets the issuer be tested end to end and backs the `verify`
//! command used when provisioning a new key pair. It needs only public keys
//! and never contacts the origin.

use std::collections::HashMap;
use std::net::IpAddr;

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;
use tracing::debug;

use super::credential::EdgeCredential;
use super::policy::AccessPolicy;
use crate::error::VerifyError;

/// Verifies credentials against provisioned public keys.
#[derive(Debug, Clone, Default)]
pub struct EdgeVerifier {
    keys: HashMap<String, RsaPublicKey>,
}

impl EdgeVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision `key` under `key_pair_id`.
    pub fn with_key(mut self, key_pair_id: impl Into<String>, key: RsaPublicKey) -> Self {
        self.keys.insert(key_pair_id.into(), key);
        self
    }

    /// Provision a PEM public key (SPKI or PKCS#1) under `key_pair_id`.
    pub fn with_pem(self, key_pair_id: impl Into<String>, pem: &str) -> Result<Self, VerifyError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| VerifyError::Malformed(format!("public key: {}", e)))?;
        Ok(self.with_key(key_pair_id, key))
    }

    /// Number of provisioned keys.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Check a signature over raw policy bytes.
    pub fn verify_signature(
        &self,
        key_pair_id: &str,
        policy: &[u8],
        signature: &[u8],
    ) -> Result<(), VerifyError> {
        let key = self
            .keys
            .get(key_pair_id)
            .ok_or_else(|| VerifyError::UnknownKeyPair(key_pair_id.to_string()))?;
        let signature =
            Signature::try_from(signature).map_err(|_| VerifyError::InvalidSignature)?;
        VerifyingKey::<Sha256>::new(key.clone())
            .verify(policy, &signature)
            .map_err(|_| VerifyError::InvalidSignature)
    }

    /// Decide whether a request for `resource_url` carrying `credential` is
    /// allowed at `now` (Unix seconds).
    ///
    /// Checks run in order: encoding, key, signature, expiry, resource scope,
    /// source address. The signature is checked over the policy bytes exactly
    /// as received, before they are interpreted.
    pub fn verify(
        &self,
        credential: &EdgeCredential,
        resource_url: &str,
        source: Option<IpAddr>,
        now: u64,
    ) -> Result<AccessPolicy, VerifyError> {
        let policy_bytes = credential.policy_bytes()?;
        let signature = credential.signature_bytes()?;
        self.verify_signature(&credential.key_pair_id, &policy_bytes, &signature)?;

        let policy = AccessPolicy::parse(&policy_bytes)?;

        if policy.is_expired_at(now) {
            return Err(VerifyError::Expired {
                expired_at: policy.expires_at,
                current_time: now,
            });
        }

        if !policy.covers(resource_url) {
            return Err(VerifyError::OutOfScope {
                resource: resource_url.to_string(),
                pattern: policy.resource,
            });
        }

        if !policy.permits_source(source) {
            return Err(VerifyError::SourceNotAllowed(
                source.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".into()),
            ));
        }

        debug!(
            key_pair_id = %credential.key_pair_id,
            resource = %resource_url,
            "Credential accepted"
        );
        Ok(policy)
    }
}
