//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   POST /auth/edge-credentials   POST /containers/{id}/images    │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │    auth     │  │        routes           │  │
//! │  │ (requests)  │  │  (session)  │  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{
    session_middleware, SessionAuth, SessionError, SessionPrincipal, ANONYMOUS_PRINCIPAL,
};
pub use handlers::{
    cookie_domain, health_handler, issue_credentials_handler, object_handler, pyramid_handler,
    upload_handler, AppState, CookieSettings, CredentialResponse, ErrorResponse, HealthResponse,
    OBJECT_CACHE_CONTROL,
};
pub use routes::{create_router, RouterConfig, DEFAULT_MAX_UPLOAD_BYTES};
