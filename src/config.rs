//! Configuration management.
//!
//! This module provides the command-line interface:
//! - Subcommands for serving, one-off derivation, issuing and verifying credentials
//! - Environment variables with `PYRAMID_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Environment Variables
//!
//! - `PYRAMID_HOST` - Server bind address (default: 0.0.0.0)
//! - `PYRAMID_PORT` - Server port (default: 3000)
//! - `PYRAMID_STORAGE` - Blob backend: s3, local or memory (default: s3)
//! - `PYRAMID_S3_BUCKET` - S3 bucket for images and descriptors
//! - `PYRAMID_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `PYRAMID_S3_REGION` - AWS region (default: us-east-1)
//! - `PYRAMID_LOCAL_ROOT` - Root directory for the local backend
//! - `PYRAMID_INGEST_MODE` - inline or deferred (default: inline)
//! - `PYRAMID_SESSION_SECRET` - HMAC secret for session tokens
//! - `PYRAMID_AUTH_ENABLED` - Enforce session authentication (default: true)
//! - `PYRAMID_SIGNING_KEY_FILE` / `PYRAMID_SIGNING_KEY` - RSA private key (PEM)
//! - `PYRAMID_KEY_PAIR_ID` - Edge key-pair identifier
//! - `PYRAMID_DISTRIBUTION_URL` - CDN distribution base URL
//! - `PYRAMID_COOKIE_DOMAIN` - Explicit cookie domain
//! - `PYRAMID_CORS_ORIGINS` - Allowed CORS origins (comma-separated)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use url::Url;

use crate::pyramid::{IngestMode, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE_CAPACITY};
use crate::store::DEFAULT_METADATA_CACHE_CAPACITY;
use crate::token::{encoding, IpRange, KeySource, PolicySigner, ResourceScope, TokenIssuer};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default key prefix for pyramid descriptors in S3.
pub const DEFAULT_METADATA_PREFIX: &str = "metadata/";

/// Default upload limit in megabytes.
pub const DEFAULT_MAX_UPLOAD_MB: usize = 64;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pyramid Edge - image pyramids behind a signed-cookie CDN.
///
/// Derives reduced-resolution previews for uploaded images and issues
/// CloudFront signed cookies that let clients fetch them from the edge.
#[derive(Parser, Debug, Clone)]
#[command(name = "pyramid-edge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeConfig),

    /// Derive and publish the pyramid for one local file
    Derive(DeriveConfig),

    /// Issue an edge credential from the command line
    Issue(IssueConfig),

    /// Check an edge credential against a public key
    Verify(VerifyConfig),
}

/// Blob storage backend.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// S3 or an S3-compatible service
    S3,
    /// Directory on the local filesystem
    Local,
    /// In-process memory (development only; lost on exit)
    Memory,
}

// =============================================================================
// Shared Argument Groups
// =============================================================================

/// Where images and descriptors are stored.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Blob storage backend.
    #[arg(long, value_enum, default_value_t = StorageBackend::S3, env = "PYRAMID_STORAGE")]
    pub storage: StorageBackend,

    /// S3 bucket holding originals, levels and descriptors.
    #[arg(long, env = "PYRAMID_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix for image objects within the bucket.
    #[arg(long, env = "PYRAMID_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// Key prefix for pyramid descriptors within the bucket.
    #[arg(long, default_value = DEFAULT_METADATA_PREFIX, env = "PYRAMID_METADATA_PREFIX")]
    pub metadata_prefix: String,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "PYRAMID_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "PYRAMID_S3_REGION")]
    pub s3_region: String,

    /// Root directory for the local backend.
    #[arg(long, env = "PYRAMID_LOCAL_ROOT")]
    pub local_root: Option<PathBuf>,
}

impl StorageArgs {
    pub fn validate(&self) -> Result<(), String> {
        match self.storage {
            StorageBackend::S3 => match self.s3_bucket.as_deref() {
                Some(bucket) if !bucket.trim().is_empty() => Ok(()),
                _ => Err(
                    "S3 bucket name is required. Set --s3-bucket or PYRAMID_S3_BUCKET".to_string(),
                ),
            },
            StorageBackend::Local if self.local_root.is_none() => Err(
                "Local storage needs a root directory. Set --local-root or PYRAMID_LOCAL_ROOT"
                    .to_string(),
            ),
            _ => Ok(()),
        }
    }

    /// The configured bucket (call validate() first).
    pub fn bucket(&self) -> String {
        self.s3_bucket.clone().unwrap_or_default()
    }
}

/// Signing key and distribution for credential issuance.
#[derive(Args, Debug, Clone)]
pub struct SigningArgs {
    /// Path to the RSA private key (PEM, PKCS#8 or PKCS#1).
    #[arg(long, env = "PYRAMID_SIGNING_KEY_FILE")]
    pub signing_key_file: Option<PathBuf>,

    /// RSA private key as PEM text. Prefer --signing-key-file.
    #[arg(long, env = "PYRAMID_SIGNING_KEY", hide_env_values = true)]
    pub signing_key: Option<String>,

    /// Key-pair identifier registered with the edge.
    #[arg(long, env = "PYRAMID_KEY_PAIR_ID")]
    pub key_pair_id: Option<String>,

    /// Base URL of the CDN distribution (e.g. https://d111111abcdef8.cloudfront.net).
    #[arg(long, env = "PYRAMID_DISTRIBUTION_URL")]
    pub distribution_url: Option<String>,

    /// Restrict credentials to paths under this prefix instead of the whole distribution.
    #[arg(long, env = "PYRAMID_SCOPE_PREFIX")]
    pub scope_prefix: Option<String>,
}

impl SigningArgs {
    /// Whether any signing option was supplied.
    pub fn is_configured(&self) -> bool {
        self.signing_key_file.is_some() || self.signing_key.is_some()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.signing_key_file.is_some() && self.signing_key.is_some() {
            return Err("Set only one of --signing-key-file and --signing-key".to_string());
        }

        match self.key_pair_id.as_deref() {
            None => {
                return Err(
                    "A key-pair id is required. Set --key-pair-id or PYRAMID_KEY_PAIR_ID"
                        .to_string(),
                )
            }
            Some(id) if !encoding::is_transport_safe(id) => {
                return Err(format!("key-pair id '{}' contains unsafe characters", id))
            }
            Some(_) => {}
        }

        let url = self.distribution_url.as_deref().ok_or_else(|| {
            "A distribution URL is required. Set --distribution-url or PYRAMID_DISTRIBUTION_URL"
                .to_string()
        })?;
        let url = Url::parse(url).map_err(|e| format!("invalid distribution URL: {}", e))?;
        if url.host().is_none() || !matches!(url.scheme(), "http" | "https") {
            return Err("distribution URL must be an http(s) URL with a host".to_string());
        }

        Ok(())
    }

    /// Key source, if one is configured.
    pub fn key_source(&self) -> Option<KeySource> {
        match (&self.signing_key_file, &self.signing_key) {
            (Some(path), _) => Some(KeySource::File(path.clone())),
            (None, Some(pem)) => Some(KeySource::Pem(pem.clone())),
            (None, None) => None,
        }
    }

    /// Resource scope granted by issued credentials.
    pub fn scope(&self) -> ResourceScope {
        match self.scope_prefix.as_deref() {
            Some(prefix) if !prefix.trim_matches('/').is_empty() => {
                ResourceScope::Prefix(prefix.to_string())
            }
            _ => ResourceScope::Distribution,
        }
    }

    /// Build the issuer (call validate() first).
    pub fn build_issuer(&self) -> Result<TokenIssuer, String> {
        self.validate()?;
        let source = self
            .key_source()
            .ok_or_else(|| "No signing key configured".to_string())?;
        let key_pair_id = self.key_pair_id.clone().unwrap_or_default();
        let url = Url::parse(self.distribution_url.as_deref().unwrap_or_default())
            .map_err(|e| format!("invalid distribution URL: {}", e))?;
        Ok(TokenIssuer::new(PolicySigner::new(source, key_pair_id), url))
    }
}

// =============================================================================
// Serve
// =============================================================================

/// Configuration for the `serve` command.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "PYRAMID_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PYRAMID_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub signing: SigningArgs,

    /// Where derivation runs relative to the upload request.
    #[arg(long, default_value = "inline", env = "PYRAMID_INGEST_MODE")]
    pub ingest_mode: IngestMode,

    /// Depth of the deferred derivation queue.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, env = "PYRAMID_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Attempts per deferred derivation before giving up.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, env = "PYRAMID_WORKER_ATTEMPTS")]
    pub worker_attempts: u32,

    /// Pyramid descriptors kept in memory.
    #[arg(long, default_value_t = DEFAULT_METADATA_CACHE_CAPACITY, env = "PYRAMID_CACHE_METADATA")]
    pub cache_metadata: usize,

    /// Largest accepted upload in megabytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_MB, env = "PYRAMID_MAX_UPLOAD_MB")]
    pub max_upload_mb: usize,

    /// Secret key for HMAC-SHA256 session tokens.
    #[arg(long, env = "PYRAMID_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Enforce session authentication.
    ///
    /// WARNING: Only disable authentication in development/testing.
    #[arg(
        long,
        default_value_t = true,
        env = "PYRAMID_AUTH_ENABLED",
        action = clap::ArgAction::Set
    )]
    pub auth_enabled: bool,

    /// Explicit Domain attribute for credential cookies.
    ///
    /// If not specified, derived from the request Origin.
    #[arg(long, env = "PYRAMID_COOKIE_DOMAIN")]
    pub cookie_domain: Option<String>,

    /// Allow credential cookies over plain HTTP (local development).
    #[arg(long, default_value_t = false, env = "PYRAMID_INSECURE_COOKIES")]
    pub insecure_cookies: bool,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, the request origin is mirrored.
    #[arg(long, env = "PYRAMID_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.auth_enabled && self.session_secret.as_deref().unwrap_or("").is_empty() {
            return Err(
                "Authentication is enabled but no secret provided. \
                 Set --session-secret or PYRAMID_SESSION_SECRET, or disable auth with --auth-enabled=false"
                    .to_string(),
            );
        }

        self.storage.validate()?;

        if self.signing.is_configured() {
            self.signing.validate()?;
        }

        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".to_string());
        }
        if self.worker_attempts == 0 {
            return Err("worker_attempts must be greater than 0".to_string());
        }
        if self.cache_metadata == 0 {
            return Err("cache_metadata must be greater than 0".to_string());
        }
        if self.max_upload_mb == 0 || self.max_upload_mb > 1024 {
            return Err("max_upload_mb must be between 1 and 1024".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the session secret, or empty if not set (call validate() first).
    pub fn session_secret_or_empty(&self) -> &str {
        self.session_secret.as_deref().unwrap_or("")
    }

    /// Upload limit in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

// =============================================================================
// Derive
// =============================================================================

/// Configuration for the `derive` command.
#[derive(Args, Debug, Clone)]
pub struct DeriveConfig {
    /// Image file to ingest.
    pub input: PathBuf,

    /// Container the image belongs to.
    #[arg(long, default_value = "local")]
    pub container: String,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl DeriveConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.input.is_file() {
            return Err(format!("input file not found: {}", self.input.display()));
        }
        if self.container.trim_matches('/').is_empty() {
            return Err("container must not be empty".to_string());
        }
        self.storage.validate()
    }
}

// =============================================================================
// Issue
// =============================================================================

/// Output format for `issue`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IssueOutputFormat {
    /// JSON with the credential and expiry
    #[default]
    Json,
    /// One Set-Cookie header value per line
    Cookies,
}

/// Configuration for the `issue` command.
#[derive(Args, Debug, Clone)]
pub struct IssueConfig {
    #[command(flatten)]
    pub signing: SigningArgs,

    /// Principal the credential is issued to (for logging).
    #[arg(long, default_value = "cli")]
    pub principal: String,

    /// Restrict the credential to a source CIDR (e.g. 203.0.113.0/24).
    #[arg(long)]
    pub source_ip: Option<String>,

    /// Cookie domain for the `cookies` format.
    #[arg(long)]
    pub cookie_domain: Option<String>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = IssueOutputFormat::Json)]
    pub format: IssueOutputFormat,
}

impl IssueConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.signing.is_configured() {
            return Err(
                "A signing key is required. Set --signing-key-file or PYRAMID_SIGNING_KEY_FILE"
                    .to_string(),
            );
        }
        self.signing.validate()?;
        self.source_range()?;
        Ok(())
    }

    /// Parsed source restriction.
    pub fn source_range(&self) -> Result<Option<IpRange>, String> {
        self.source_ip.as_deref().map(str::parse::<IpRange>).transpose()
    }
}

// =============================================================================
// Verify
// =============================================================================

/// Configuration for the `verify` command.
#[derive(Args, Debug, Clone)]
pub struct VerifyConfig {
    /// Public key (PEM) matching the key pair.
    #[arg(long, env = "PYRAMID_PUBLIC_KEY_FILE")]
    pub public_key_file: PathBuf,

    /// Key-pair identifier the public key is registered under.
    #[arg(long, env = "PYRAMID_KEY_PAIR_ID")]
    pub key_pair_id: String,

    /// Cookie header carrying the credential.
    #[arg(long)]
    pub cookie: String,

    /// Resource URL being requested.
    #[arg(long)]
    pub resource: String,

    /// Client address of the request.
    #[arg(long)]
    pub source_ip: Option<std::net::IpAddr>,
}

impl VerifyConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.public_key_file.is_file() {
            return Err(format!(
                "public key file not found: {}",
                self.public_key_file.display()
            ));
        }
        if self.cookie.trim().is_empty() {
            return Err("cookie header must not be empty".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
