use thiserror::Error;

/// Errors raised by the blob and metadata stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backing store could not be reached or rejected the request
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Object or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored record could not be decoded
    #[error("Corrupt record at {path}: {message}")]
    Corrupt { path: String, message: String },
}

/// Structural defects in a pyramid descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Not exactly one `full` level
    #[error("expected exactly one full level, found {0}")]
    FullLevelCount(usize),

    /// The `full` level is not listed first
    #[error("full level must be listed first")]
    FullLevelNotFirst,

    /// The `full` level does not match the original dimensions
    #[error("full level is {level_width}x{level_height} but original is {width}x{height}")]
    FullLevelMismatch {
        level_width: u32,
        level_height: u32,
        width: u32,
        height: u32,
    },

    /// Level widths are not strictly descending
    #[error("levels not in descending width order: {first} then {second}")]
    LevelOrder { first: u32, second: u32 },

    /// Level paths differ from the blobs being written
    #[error("descriptor levels do not match the blobs being written")]
    BlobMismatch,
}

/// Errors raised while deriving and publishing an image pyramid.
#[derive(Debug, Clone, Error)]
pub enum PyramidError {
    /// Input bytes cannot be decoded as a supported image (HTTP 415)
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// Resampling or re-encoding could not produce a valid preview
    #[error("Resize failure: {message}")]
    ResizeFailure { message: String },

    /// A store write failed; nothing was published
    #[error("Persist failure: {0}")]
    PersistFailure(#[source] StoreError),

    /// The derived descriptor is malformed; nothing was published
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
}

impl PyramidError {
    /// Whether the whole derive-and-persist attempt may be retried from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PyramidError::PersistFailure(StoreError::Unavailable(_))
        )
    }
}

/// Errors raised while issuing edge credentials.
#[derive(Debug, Clone, Error)]
pub enum TokenError {
    /// The signing key could not be loaded or parsed
    #[error("Signing key unavailable: {reason}")]
    SigningKeyUnavailable { reason: String },

    /// The signing operation itself failed
    #[error("Signing failed: {message}")]
    SigningFailed { message: String },

    /// The policy document could not be serialized
    #[error("Policy serialization failed: {message}")]
    Serialization { message: String },
}

/// Reasons an edge verifier rejects a credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// One of the three credential values is absent
    #[error("Missing credential value: {0}")]
    MissingValue(&'static str),

    /// A credential value is not valid edge base64 or the policy is not valid JSON
    #[error("Malformed credential: {0}")]
    Malformed(String),

    /// No public key is provisioned for the key-pair id
    #[error("Unknown key pair: {0}")]
    UnknownKeyPair(String),

    /// Signature does not match the policy
    #[error("Invalid signature")]
    InvalidSignature,

    /// Policy expiry has passed
    #[error("Credential expired at {expired_at} (current time: {current_time})")]
    Expired { expired_at: u64, current_time: u64 },

    /// Requested resource is outside the policy's resource pattern
    #[error("Resource {resource} is outside the policy scope {pattern}")]
    OutOfScope { resource: String, pattern: String },

    /// Request source address is not permitted by the policy
    #[error("Source address {0} is not permitted")]
    SourceNotAllowed(String),
}
