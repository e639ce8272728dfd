//! HTTP request handlers.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /auth/edge-credentials` - Issue signed edge cookies
//! - `POST /containers/{container_id}/images` - Upload an original image
//! - `GET /images/{image_id}/pyramid` - Pyramid descriptor
//! - `GET /objects/{*path}` - Stored level bytes through the origin

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, warn};
use url::Url;

use super::auth::SessionPrincipal;
use crate::error::{PyramidError, StoreError, TokenError};
use crate::model::PyramidMetadata;
use crate::pyramid::{IngestOutcome, IngestService};
use crate::store::{content_type_for, MetadataStore};
use crate::token::{CookieOptions, IssuedCredential, ResourceScope, TokenIssuer};

// =============================================================================
// Application State
// =============================================================================

/// How credential cookies are scoped.
#[derive(Debug, Clone, Default)]
pub struct CookieSettings {
    /// Explicit cookie domain; otherwise derived from the request `Origin`
    pub domain: Option<String>,

    /// Send cookies over plain HTTP too (local development)
    pub insecure: bool,
}

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Upload pipeline
    pub ingest: IngestService,

    /// Descriptor reads
    pub metadata: Arc<dyn MetadataStore>,

    /// Credential issuer; issuance fails when no key is configured
    pub issuer: Option<Arc<TokenIssuer>>,

    /// Resource scope granted by issued credentials
    pub scope: ResourceScope,

    /// Cookie attributes
    pub cookies: CookieSettings,
}

impl AppState {
    /// Create state without credential issuance.
    pub fn new(ingest: IngestService, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            ingest,
            metadata,
            issuer: None,
            scope: ResourceScope::Distribution,
            cookies: CookieSettings::default(),
        }
    }

    /// Enable credential issuance.
    pub fn with_issuer(mut self, issuer: TokenIssuer) -> Self {
        self.issuer = Some(Arc::new(issuer));
        self
    }

    /// Set the scope granted by issued credentials.
    pub fn with_scope(mut self, scope: ResourceScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set cookie attributes.
    pub fn with_cookies(mut self, cookies: CookieSettings) -> Self {
        self.cookies = cookies;
        self
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "unsupported_format")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create a new error response with status code.
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// `Cache-Control` for stored objects. Level paths embed a fresh image id,
/// so an object never changes once written.
pub const OBJECT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

/// Response from the credential issuance endpoint.
#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    /// Authenticated principal the credential was issued to
    pub principal: String,

    /// Whether the three edge cookies were set on this response
    pub cookies_set: bool,

    #[serde(flatten)]
    pub issued: IssuedCredential,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Log an error response at a level matching its status class.
fn log_error(status: StatusCode, error_type: &str, message: &str) {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }
}

fn error_response(status: StatusCode, error_type: &str, message: String) -> Response {
    log_error(status, error_type, &message);
    let body = ErrorResponse::with_status(error_type, message, status);
    (status, Json(body)).into_response()
}

/// Convert PyramidError to HTTP response.
impl IntoResponse for PyramidError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            PyramidError::UnsupportedFormat { .. } => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format")
            }
            PyramidError::ResizeFailure { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "resize_failure")
            }
            PyramidError::PersistFailure(_) => (StatusCode::SERVICE_UNAVAILABLE, "persist_failure"),
            PyramidError::InvalidDescriptor(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid_descriptor")
            }
        };
        error_response(status, error_type, self.to_string())
    }
}

/// Convert StoreError to HTTP response.
impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            StoreError::Corrupt { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "corrupt_record"),
        };
        error_response(status, error_type, self.to_string())
    }
}

/// Convert TokenError to HTTP response.
///
/// Messages never include key material.
impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        let error_type = match &self {
            TokenError::SigningKeyUnavailable { .. } => "signing_key_unavailable",
            TokenError::SigningFailed { .. } => "signing_failed",
            TokenError::Serialization { .. } => "policy_serialization",
        };
        error_response(StatusCode::INTERNAL_SERVER_ERROR, error_type, self.to_string())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Issue edge credentials to the authenticated principal.
///
/// # Endpoint
///
/// `POST /auth/edge-credentials`
///
/// # Response
///
/// `200 OK` with three `Set-Cookie` headers (`CloudFront-Policy`,
/// `CloudFront-Signature`, `CloudFront-Key-Pair-Id`) and a JSON body with the
/// credential, resource pattern, `expires_in` (seconds) and `expires_at`.
///
/// # Errors
///
/// - `401 Unauthorized`: Missing or invalid session token
/// - `500 Internal Server Error`: Signing key unavailable
pub async fn issue_credentials_handler(
    State(state): State<AppState>,
    SessionPrincipal(principal): SessionPrincipal,
    headers: HeaderMap,
) -> Result<Response, TokenError> {
    let issuer = state
        .issuer
        .as_ref()
        .ok_or_else(|| TokenError::SigningKeyUnavailable {
            reason: "no signing key is configured".to_string(),
        })?;

    let issued = issuer.issue(&principal, &state.scope)?;

    let mut options = CookieOptions::new(issued.expires_in);
    if let Some(domain) = cookie_domain(
        state.cookies.domain.as_deref(),
        headers.get(header::ORIGIN),
    ) {
        options = options.with_domain(domain);
    }
    if state.cookies.insecure {
        options = options.insecure();
    }

    let cookies: Vec<(header::HeaderName, String)> = issued
        .credential
        .set_cookie_headers(&options)
        .into_iter()
        .map(|cookie| (header::SET_COOKIE, cookie))
        .collect();

    debug!(
        principal = %principal.id,
        domain = ?options.domain,
        "Setting edge credential cookies"
    );

    let body = CredentialResponse {
        principal: principal.id,
        cookies_set: true,
        issued,
    };

    Ok((
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-store")],
        AppendHeaders(cookies),
        Json(body),
    )
        .into_response())
}

/// Pick the cookie `Domain` attribute.
///
/// An explicit domain wins. Otherwise the host of the request `Origin` is
/// used, except for `localhost` and bare IP addresses, which get host-only
/// cookies.
pub fn cookie_domain(configured: Option<&str>, origin: Option<&HeaderValue>) -> Option<String> {
    if let Some(domain) = configured.filter(|d| !d.is_empty()) {
        return Some(domain.to_string());
    }

    let origin = origin?.to_str().ok()?;
    let url = Url::parse(origin).ok()?;
    match url.host()? {
        url::Host::Domain(host) if host != "localhost" => Some(host.to_string()),
        _ => None,
    }
}

/// Upload an original image into a container.
///
/// # Endpoint
///
/// `POST /containers/{container_id}/images`
///
/// The request body is the raw image file.
///
/// # Response
///
/// - `201 Created` with the published descriptor when derivation ran inline
/// - `202 Accepted` when derivation was queued
///
/// # Errors
///
/// - `415 Unsupported Media Type`: Body is not a decodable image
/// - `422 Unprocessable Entity`: Preview could not be produced
/// - `503 Service Unavailable`: A store write failed; nothing was published
pub async fn upload_handler(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestOutcome>), PyramidError> {
    let outcome = state.ingest.ingest(&container_id, body).await?;

    let status = if outcome.deferred {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// Fetch the pyramid descriptor for an image.
///
/// # Endpoint
///
/// `GET /images/{image_id}/pyramid`
///
/// # Errors
///
/// - `404 Not Found`: No descriptor (unknown image or derivation pending)
/// - `503 Service Unavailable`: Metadata store unreachable
pub async fn pyramid_handler(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Json<PyramidMetadata>, StoreError> {
    let metadata = state.metadata.get(&image_id).await?;
    Ok(Json(metadata))
}

/// Serve a stored object through the origin.
///
/// # Endpoint
///
/// `GET /objects/{*path}`
///
/// For clients that cannot reach the edge. The content type follows the
/// path extension.
///
/// # Errors
///
/// - `404 Not Found`: No object at the path
/// - `503 Service Unavailable`: Blob store unreachable or path refused
pub async fn object_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, StoreError> {
    let bytes = state.ingest.blob_store().get(&path).await?;

    debug!(path = %path, bytes = bytes.len(), "Serving stored object");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&path)),
            (header::CACHE_CONTROL, OBJECT_CACHE_CONTROL),
        ],
        bytes,
    )
        .into_response())
}

// =============================================================================
// Tests
// =============================================================================
