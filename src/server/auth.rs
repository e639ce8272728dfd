//! Session authentication for the credential endpoints.
//!
//! Callers present a short session token issued by the login service:
//!
//! ```text
//! Authorization: Bearer {principal}.{expiry}.{hex(HMAC-SHA256(secret, "{principal}.{expiry}"))}
//! ```
//!
//! The principal may itself contain dots; the last two segments are always
//! the expiry and the signature.
//!
//! # Security Properties
//!
//! - **Principal binding**: the MAC covers the principal and expiry together
//! - **Time-limited**: tokens are rejected at or after their expiry
//! - **Constant-time comparison**: MACs are compared with `subtle`
//!
//! # Example
//!
//! ```rust
//! use pyramid_edge::server::auth::SessionAuth;
//! use std::time::Duration;
//!
//! let auth = SessionAuth::new("session-secret");
//! let (token, _expiry) = auth.issue("alice", Duration::from_secs(3600));
//!
//! let principal = auth.verify(&token).unwrap();
//! assert_eq!(principal.id, "alice");
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

use super::handlers::ErrorResponse;
use crate::token::Principal;

/// HMAC-SHA256 type alias
type HmacSha256 = Hmac<Sha256>;

/// Principal used when session authentication is disabled.
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

// =============================================================================
// Errors
// =============================================================================

/// Session authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No bearer token on the request
    #[error("Missing bearer token")]
    MissingToken,

    /// Token is not `{principal}.{expiry}.{mac}`
    #[error("Malformed session token")]
    MalformedToken,

    /// Token has expired
    #[error("Session expired at {expired_at} (current time: {current_time})")]
    Expired { expired_at: u64, current_time: u64 },

    /// MAC does not match
    #[error("Invalid session signature")]
    InvalidSignature,
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let error_type = match &self {
            SessionError::MissingToken => "missing_token",
            SessionError::MalformedToken => "malformed_token",
            SessionError::Expired { .. } => "session_expired",
            SessionError::InvalidSignature => "invalid_signature",
        };
        let status = StatusCode::UNAUTHORIZED;
        let message = self.to_string();

        // Bad MACs and malformed tokens are worth a warning; the rest are routine
        match &self {
            SessionError::InvalidSignature | SessionError::MalformedToken => {
                warn!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Authentication failed: {}",
                    message
                );
            }
            _ => {
                debug!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Authentication failed: {}",
                    message
                );
            }
        }

        let body = ErrorResponse::with_status(error_type, message, status);
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Session Authenticator
// =============================================================================

/// HMAC-SHA256 session token authenticator.
#[derive(Clone)]
pub struct SessionAuth {
    secret_key: Vec<u8>,
}

impl SessionAuth {
    /// Create an authenticator with the shared secret.
    pub fn new(secret_key: impl AsRef<[u8]>) -> Self {
        Self {
            secret_key: secret_key.as_ref().to_vec(),
        }
    }

    /// Issue a token for `principal` valid for `ttl`.
    ///
    /// Returns the token and its expiry (Unix seconds).
    pub fn issue(&self, principal: &str, ttl: Duration) -> (String, u64) {
        let expiry = unix_now() + ttl.as_secs();
        (self.issue_with_expiry(principal, expiry), expiry)
    }

    /// Issue a token with a specific expiry.
    pub fn issue_with_expiry(&self, principal: &str, expiry: u64) -> String {
        format!(
            "{}.{}.{}",
            principal,
            expiry,
            self.compute_signature(principal, expiry)
        )
    }

    /// Verify a token against the current time.
    pub fn verify(&self, token: &str) -> Result<Principal, SessionError> {
        self.verify_at(token, unix_now())
    }

    /// Verify a token as of `now` (Unix seconds).
    pub fn verify_at(&self, token: &str, now: u64) -> Result<Principal, SessionError> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(signature), Some(expiry), Some(principal)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(SessionError::MalformedToken);
        };
        if principal.is_empty() {
            return Err(SessionError::MalformedToken);
        }
        let expiry: u64 = expiry.parse().map_err(|_| SessionError::MalformedToken)?;
        let provided = hex::decode(signature).map_err(|_| SessionError::MalformedToken)?;

        let expected = self.compute_mac(principal, expiry);
        if !bool::from(provided.ct_eq(&expected)) {
            return Err(SessionError::InvalidSignature);
        }

        if now >= expiry {
            return Err(SessionError::Expired {
                expired_at: expiry,
                current_time: now,
            });
        }

        Ok(Principal::new(principal))
    }

    fn compute_mac(&self, principal: &str, expiry: u64) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret_key).expect("HMAC can take key of any size");
        mac.update(principal.as_bytes());
        mac.update(b".");
        mac.update(expiry.to_string().as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    fn compute_signature(&self, principal: &str, expiry: u64) -> String {
        hex::encode(self.compute_mac(principal, expiry))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// Axum Integration
// =============================================================================

/// Middleware that authenticates the bearer token and stores the
/// [`Principal`] in the request extensions.
pub async fn session_middleware(
    State(auth): State<SessionAuth>,
    mut request: Request,
    next: Next,
) -> Result<Response, SessionError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(SessionError::MissingToken)?;

    let principal = auth.verify(token.trim())?;
    debug!(principal = %principal.id, "Session authenticated");

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Extractor for the authenticated principal.
///
/// Falls back to [`ANONYMOUS_PRINCIPAL`] when no session middleware ran,
/// which only happens with authentication disabled.
#[derive(Debug, Clone)]
pub struct SessionPrincipal(pub Principal);

impl<S> FromRequestParts<S> for SessionPrincipal
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .extensions
            .get::<Principal>()
            .cloned()
            .unwrap_or_else(|| Principal::new(ANONYMOUS_PRINCIPAL));
        Ok(SessionPrincipal(principal))
    }
}

// =============================================================================
// Tests
// =============================================================================
