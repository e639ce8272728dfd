//! Router configuration.
//!
//! This module defines the HTTP routes and applies middleware for session
//! authentication, CORS, body limits and tracing.
//!
//! # Route Structure
//!
//! ```text
//! /health                                - Health check (public)
//! /auth/edge-credentials                 - Issue edge cookies (session)
//! /containers/{container_id}/images      - Upload original (session)
//! /images/{image_id}/pyramid             - Pyramid descriptor (session)
//! /objects/{*path}                       - Stored object proxy (session)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pyramid_edge::server::{create_router, AppState, RouterConfig};
//!
//! let state = AppState::new(ingest, metadata).with_issuer(issuer);
//! let config = RouterConfig::new("session-secret")
//!     .with_cors_origins(vec!["https://app.example.com".to_string()]);
//!
//! let router = create_router(state, config);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::{session_middleware, SessionAuth};
use super::handlers::{
    health_handler, issue_credentials_handler, object_handler, pyramid_handler, upload_handler,
    AppState,
};

/// Default upload size limit (64 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Secret key for session token verification
    pub session_secret: String,

    /// Whether session authentication is enforced
    pub auth_enabled: bool,

    /// Allowed CORS origins (None = mirror the request origin)
    pub cors_origins: Option<Vec<String>>,

    /// Maximum accepted upload body in bytes
    pub max_upload_bytes: usize,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a new router configuration with the given session secret.
    ///
    /// By default:
    /// - Authentication is enabled
    /// - CORS mirrors the request origin
    /// - Uploads are limited to 64 MiB
    /// - Tracing is enabled
    pub fn new(session_secret: impl Into<String>) -> Self {
        Self {
            session_secret: session_secret.into(),
            auth_enabled: true,
            cors_origins: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            enable_tracing: true,
        }
    }

    /// Create a configuration with authentication disabled.
    ///
    /// **Warning**: This should only be used for development/testing.
    pub fn without_auth() -> Self {
        Self {
            auth_enabled: false,
            ..Self::new(String::new())
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Set the upload size limit.
    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Enable or disable authentication.
    pub fn with_auth_enabled(mut self, enabled: bool) -> Self {
        self.auth_enabled = enabled;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
pub fn create_router(app_state: AppState, config: RouterConfig) -> Router {
    let cors = build_cors_layer(&config);

    let session_routes = Router::new()
        .route("/auth/edge-credentials", post(issue_credentials_handler))
        .route("/containers/{container_id}/images", post(upload_handler))
        .route("/images/{image_id}/pyramid", get(pyramid_handler))
        .route("/objects/{*path}", get(object_handler))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .with_state(app_state);

    let session_routes = if config.auth_enabled {
        let auth = SessionAuth::new(&config.session_secret);
        session_routes.layer(middleware::from_fn_with_state(auth, session_middleware))
    } else {
        session_routes
    };

    let router = Router::new()
        .route("/health", get(health_handler))
        .merge(session_routes)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
///
/// Credentials are always allowed since the edge cookies are set on a
/// cross-origin response; that rules out a literal `*` origin.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(AllowOrigin::mirror_request()),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<HeaderValue> =
                origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
