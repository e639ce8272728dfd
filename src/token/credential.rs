//! Credential transport.
//!
//! The edge reads three independent name/value pairs. They are delivered as
//! cookies so every image fetch carries them without client code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::encoding;
use crate::error::VerifyError;

/// Cookie carrying the encoded policy document.
pub const POLICY_COOKIE: &str = "CloudFront-Policy";

/// Cookie carrying the encoded signature.
pub const SIGNATURE_COOKIE: &str = "CloudFront-Signature";

/// Cookie carrying the key-pair identifier.
pub const KEY_PAIR_ID_COOKIE: &str = "CloudFront-Key-Pair-Id";

/// The three-piece credential the edge verifies.
///
/// All values are already in the edge's base64 alphabet and can be placed in
/// a cookie or query string without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeCredential {
    /// Encoded canonical policy
    pub policy: String,

    /// Encoded signature over the canonical policy bytes
    pub signature: String,

    /// Identifier of the verifying public key
    pub key_pair_id: String,
}

impl EdgeCredential {
    /// Encode a signed policy.
    pub fn encode(canonical_policy: &[u8], signature: &[u8], key_pair_id: &str) -> Self {
        Self {
            policy: encoding::encode(canonical_policy),
            signature: encoding::encode(signature),
            key_pair_id: key_pair_id.to_string(),
        }
    }

    /// The credential as `(name, value)` pairs.
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            (POLICY_COOKIE, &self.policy),
            (SIGNATURE_COOKIE, &self.signature),
            (KEY_PAIR_ID_COOKIE, &self.key_pair_id),
        ]
    }

    /// Decoded canonical policy bytes.
    pub fn policy_bytes(&self) -> Result<Vec<u8>, VerifyError> {
        encoding::decode(&self.policy)
            .map_err(|e| VerifyError::Malformed(format!("{}: {}", POLICY_COOKIE, e)))
    }

    /// Decoded signature bytes.
    pub fn signature_bytes(&self) -> Result<Vec<u8>, VerifyError> {
        encoding::decode(&self.signature)
            .map_err(|e| VerifyError::Malformed(format!("{}: {}", SIGNATURE_COOKIE, e)))
    }

    /// Render one `Set-Cookie` header value per credential piece.
    pub fn set_cookie_headers(&self, options: &CookieOptions) -> Vec<String> {
        self.pairs()
            .iter()
            .map(|(name, value)| options.render(name, value))
            .collect()
    }

    /// Extract the credential from a `Cookie` request header.
    ///
    /// Unrelated cookies are ignored. Every piece must be present.
    pub fn from_cookie_header(header: &str) -> Result<Self, VerifyError> {
        let mut policy = None;
        let mut signature = None;
        let mut key_pair_id = None;

        for pair in header.split(';') {
            let Some((name, value)) = pair.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match name.trim() {
                POLICY_COOKIE => policy = Some(value),
                SIGNATURE_COOKIE => signature = Some(value),
                KEY_PAIR_ID_COOKIE => key_pair_id = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            policy: policy.ok_or(VerifyError::MissingValue(POLICY_COOKIE))?,
            signature: signature.ok_or(VerifyError::MissingValue(SIGNATURE_COOKIE))?,
            key_pair_id: key_pair_id.ok_or(VerifyError::MissingValue(KEY_PAIR_ID_COOKIE))?,
        })
    }
}

/// Attributes applied to each credential cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    /// Cookie domain; host-only when absent
    pub domain: Option<String>,

    /// Cookie lifetime, normally the credential TTL
    pub max_age: Duration,

    /// Emit `Secure` and `SameSite=None`
    pub secure: bool,
}

impl CookieOptions {
    /// Options for a cookie living `max_age`.
    pub fn new(max_age: Duration) -> Self {
        Self {
            domain: None,
            max_age,
            secure: true,
        }
    }

    /// Scope the cookies to `domain`.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Allow plain-HTTP cookies (local development only).
    pub fn insecure(mut self) -> Self {
        self.secure = false;
        self
    }

    fn render(&self, name: &str, value: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly",
            name,
            value,
            self.max_age.as_secs()
        );
        if let Some(domain) = &self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if self.secure {
            cookie.push_str("; Secure; SameSite=None");
        } else {
            cookie.push_str("; SameSite=Lax");
        }
        cookie
    }
}
