//! Access policy documents.
//!
//! # Canonical Form
//!
//! The policy is serialized as compact JSON with a fixed key order, matching
//! the CloudFront custom-policy layout:
//!
//! ```text
//! {"Statement":[{"Resource":"https://cdn.example.com/*","Condition":{"DateLessThan":{"AWS:EpochTime":1735689600}}}]}
//! ```
//!
//! An optional `"IpAddress":{"AWS:SourceIp":"192.0.2.0/24"}` follows
//! `DateLessThan` inside `Condition`. Two equal policies always produce the
//! same bytes, and those bytes are exactly what gets signed.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::{TokenError, VerifyError};

// =============================================================================
// Resource Scope
// =============================================================================

/// Which resource paths a credential may fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceScope {
    /// Every path on the distribution
    Distribution,

    /// Every path under a prefix (e.g. a container)
    Prefix(String),

    /// A single path
    Exact(String),
}

impl ResourceScope {
    /// Resource pattern for this scope on `distribution`.
    ///
    /// Only the origin of `distribution` is used, e.g.
    /// `Prefix("block-1")` on `https://cdn.example.com` becomes
    /// `https://cdn.example.com/block-1/*`.
    pub fn pattern(&self, distribution: &Url) -> String {
        let origin = distribution.origin().ascii_serialization();
        match self {
            ResourceScope::Distribution => format!("{}/*", origin),
            ResourceScope::Prefix(prefix) => {
                let prefix = prefix.trim_matches('/');
                if prefix.is_empty() {
                    format!("{}/*", origin)
                } else {
                    format!("{}/{}/*", origin, prefix)
                }
            }
            ResourceScope::Exact(path) => format!("{}/{}", origin, path.trim_start_matches('/')),
        }
    }
}

// =============================================================================
// Source Address Range
// =============================================================================

/// A CIDR block restricting which client addresses may use a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix_len: u8,
}

impl IpRange {
    /// Create a range, masking host bits off `network`.
    pub fn new(network: IpAddr, prefix_len: u8) -> Result<Self, String> {
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(format!("prefix length {} exceeds {}", prefix_len, max));
        }

        let network = match network {
            IpAddr::V4(addr) => IpAddr::V4((u32::from(addr) & mask_v4(prefix_len)).into()),
            IpAddr::V6(addr) => IpAddr::V6((u128::from(addr) & mask_v6(prefix_len)).into()),
        };
        Ok(Self {
            network,
            prefix_len,
        })
    }

    /// Whether `addr` falls inside this range.
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(a)) => {
                u32::from(a) & mask_v4(self.prefix_len) == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(a)) => {
                u128::from(a) & mask_v6(self.prefix_len) == u128::from(net)
            }
            _ => false,
        }
    }
}

fn mask_v4(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

fn mask_v6(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix_len))
    }
}

impl FromStr for IpRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| format!("invalid address in '{}'", s))?;
        let prefix_len = match prefix {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| format!("invalid prefix length in '{}'", s))?,
            None if addr.is_ipv4() => 32,
            None => 128,
        };
        IpRange::new(addr, prefix_len)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl Serialize for IpRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Access Policy
// =============================================================================

/// What a signed credential authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Resource URL pattern; `*` matches any run of characters, `?` one
    pub resource: String,

    /// Expiry instant (Unix epoch seconds); valid strictly before this
    pub expires_at: u64,

    /// Optional client address restriction
    pub source_ip: Option<IpRange>,
}

impl AccessPolicy {
    /// Create a policy for `resource` expiring at `expires_at`.
    pub fn new(resource: impl Into<String>, expires_at: u64) -> Self {
        Self {
            resource: resource.into(),
            expires_at,
            source_ip: None,
        }
    }

    /// Restrict the policy to a client address range.
    pub fn with_source_ip(mut self, range: IpRange) -> Self {
        self.source_ip = Some(range);
        self
    }

    /// Serialize to the canonical byte form that is signed.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, TokenError> {
        let document = PolicyDocument {
            statement: vec![Statement {
                resource: self.resource.clone(),
                condition: Condition {
                    date_less_than: EpochTime {
                        epoch_time: self.expires_at,
                    },
                    ip_address: self.source_ip.map(|range| SourceIp { source_ip: range }),
                },
            }],
        };

        serde_json::to_vec(&document).map_err(|e| TokenError::Serialization {
            message: e.to_string(),
        })
    }

    /// Parse a policy from its serialized form.
    pub fn parse(bytes: &[u8]) -> Result<Self, VerifyError> {
        let document: PolicyDocument = serde_json::from_slice(bytes)
            .map_err(|e| VerifyError::Malformed(format!("policy JSON: {}", e)))?;

        let mut statements = document.statement.into_iter();
        let statement = match (statements.next(), statements.next()) {
            (Some(statement), None) => statement,
            _ => {
                return Err(VerifyError::Malformed(
                    "policy must contain exactly one statement".to_string(),
                ))
            }
        };

        Ok(Self {
            resource: statement.resource,
            expires_at: statement.condition.date_less_than.epoch_time,
            source_ip: statement.condition.ip_address.map(|ip| ip.source_ip),
        })
    }

    /// Whether the policy has expired at `now` (Unix seconds).
    ///
    /// Expiry is exclusive: a credential checked exactly at `expires_at` is
    /// already expired.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether `resource_url` matches the resource pattern.
    pub fn covers(&self, resource_url: &str) -> bool {
        wildcard_match(&self.resource, resource_url)
    }

    /// Whether a request from `addr` is permitted.
    ///
    /// Unrestricted policies permit any source, including an unknown one.
    pub fn permits_source(&self, addr: Option<IpAddr>) -> bool {
        match (self.source_ip, addr) {
            (None, _) => true,
            (Some(range), Some(addr)) => range.contains(addr),
            (Some(_), None) => false,
        }
    }
}

/// Glob match with `*` (any run, including empty) and `?` (exactly one char).
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut star_text = 0;

    while t < text.len() {
        // `*` is always a wildcard, even against a literal `*` in the text
        if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_text = t;
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if let Some(s) = star {
            p = s + 1;
            star_text += 1;
            t = star_text;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

// =============================================================================
// Wire Document
// =============================================================================
//
// Field order in these structs is the canonical key order.

#[derive(Serialize, Deserialize)]
struct PolicyDocument {
    #[serde(rename = "Statement")]
    statement: Vec<Statement>,
}

#[derive(Serialize, Deserialize)]
struct Statement {
    #[serde(rename = "Resource")]
    resource: String,
    #[serde(rename = "Condition")]
    condition: Condition,
}

#[derive(Serialize, Deserialize)]
struct Condition {
    #[serde(rename = "DateLessThan")]
    date_less_than: EpochTime,
    #[serde(rename = "IpAddress", default, skip_serializing_if = "Option::is_none")]
    ip_address: Option<SourceIp>,
}

#[derive(Serialize, Deserialize)]
struct EpochTime {
    #[serde(rename = "AWS:EpochTime")]
    epoch_time: u64,
}

#[derive(Serialize, Deserialize)]
struct SourceIp {
    #[serde(rename = "AWS:SourceIp")]
    source_ip: IpRange,
}

// =============================================================================
// Tests
// =============================================================================
