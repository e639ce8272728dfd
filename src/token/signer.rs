//! Policy signing.
//!
//! Signatures are RSASSA-PKCS1-v1_5 over SHA-256, the scheme CloudFront
//! verifies. The private key is read from its [`KeySource`] on every call, so
//! a rotated key file takes effect without a restart and a missing key fails
//! the request that needed it rather than the process.

use std::fmt;
use std::path::PathBuf;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use tracing::debug;

use crate::error::TokenError;

/// Where the private signing key comes from.
#[derive(Clone)]
pub enum KeySource {
    /// PEM text held in memory (PKCS#8 or PKCS#1)
    Pem(String),

    /// Path to a PEM file
    File(PathBuf),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Pem(_) => f.write_str("KeySource::Pem(<redacted>)"),
            KeySource::File(path) => f.debug_tuple("KeySource::File").field(path).finish(),
        }
    }
}

impl KeySource {
    /// Load and parse the private key.
    pub fn load(&self) -> Result<RsaPrivateKey, TokenError> {
        let pem = match self {
            KeySource::Pem(pem) => pem.clone(),
            KeySource::File(path) => std::fs::read_to_string(path).map_err(|e| {
                TokenError::SigningKeyUnavailable {
                    reason: format!("cannot read {}: {}", path.display(), e),
                }
            })?,
        };

        parse_private_key(&pem)
    }
}

/// Parse a PEM private key, accepting PKCS#8 and PKCS#1 encodings.
///
/// Parser error details are not included in the returned error since they can
/// echo fragments of the key.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, TokenError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|_| TokenError::SigningKeyUnavailable {
            reason: "key is not a PKCS#8 or PKCS#1 PEM RSA private key".to_string(),
        })
}

/// Signs canonical policy bytes with a fixed key pair.
#[derive(Debug, Clone)]
pub struct PolicySigner {
    source: KeySource,
    key_pair_id: String,
}

impl PolicySigner {
    /// Create a signer for the key pair `key_pair_id`.
    pub fn new(source: KeySource, key_pair_id: impl Into<String>) -> Self {
        Self {
            source,
            key_pair_id: key_pair_id.into(),
        }
    }

    /// Identifier of the public key the edge should verify with.
    pub fn key_pair_id(&self) -> &str {
        &self.key_pair_id
    }

    /// Sign `canonical` and return the raw signature bytes.
    ///
    /// # Errors
    ///
    /// - `SigningKeyUnavailable` if the key cannot be read or parsed
    /// - `SigningFailed` if the RSA operation fails
    pub fn sign(&self, canonical: &[u8]) -> Result<Vec<u8>, TokenError> {
        let key = self.source.load()?;
        let signing_key = SigningKey::<Sha256>::new(key);

        let signature = signing_key
            .try_sign(canonical)
            .map_err(|e| TokenError::SigningFailed {
                message: e.to_string(),
            })?;

        debug!(
            key_pair_id = %self.key_pair_id,
            policy_bytes = canonical.len(),
            "Signed policy"
        );
        Ok(signature.to_vec())
    }
}
