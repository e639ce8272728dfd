//! API integration tests for uploads, descriptors and credential issuance.
//!
//! Tests verify:
//! - Upload status codes for inline and rejected uploads
//! - Descriptor lookup by image id
//! - Stored objects served through the origin
//! - Edge cookies on the issuance response
//! - Session authentication on protected routes
//! - HTTP response codes and headers

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use pyramid_edge::token::{KEY_PAIR_ID_COOKIE, POLICY_COOKIE, SIGNATURE_COOKIE};
use pyramid_edge::{
    create_router, AppState, BlobStore, CookieSettings, EdgeCredential, RouterConfig,
    SessionAuth,
};

use super::test_utils::{gradient_png, test_issuer, test_verifier, MemoryFixture};

const SECRET: &str = "integration-session-secret";

fn state(fixture: &MemoryFixture) -> AppState {
    AppState::new(fixture.ingest.clone(), Arc::new(fixture.metadata.clone()))
        .with_issuer(test_issuer())
}

fn open_router(fixture: &MemoryFixture) -> Router {
    create_router(state(fixture), RouterConfig::without_auth().with_tracing(false))
}

fn session_router(fixture: &MemoryFixture) -> Router {
    create_router(state(fixture), RouterConfig::new(SECRET).with_tracing(false))
}

fn bearer(principal: &str) -> String {
    let (token, _) = SessionAuth::new(SECRET).issue(principal, Duration::from_secs(3600));
    format!("Bearer {}", token)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_public() {
    let fixture = MemoryFixture::new();
    let router = session_router(&fixture);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
}

// =============================================================================
// Uploads and Descriptors
// =============================================================================

#[tokio::test]
async fn test_upload_then_fetch_descriptor() {
    let fixture = MemoryFixture::new();
    let router = open_router(&fixture);

    let request = Request::builder()
        .method("POST")
        .uri("/containers/block-3/images")
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(gradient_png(2100, 300)))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = json_body(response).await;
    assert_eq!(json["decision"], "multi_level");
    assert_eq!(json["deferred"], false);
    let image_id = json["image"]["image_id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .uri(format!("/images/{}/pyramid", image_id))
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    let levels = json["levels"].as_array().unwrap();
    assert_eq!(levels.len(), 2);
    assert_eq!(levels[0]["purpose"], "full");
    assert_eq!(levels[0]["width"], 2100);
    assert_eq!(levels[1]["purpose"], "preview");
    assert_eq!(levels[1]["width"], 1050);
    assert_eq!(levels[1]["path"], format!("block-3/{}/1050w.jpg", image_id));
}

#[tokio::test]
async fn test_upload_garbage_rejected() {
    let fixture = MemoryFixture::new();
    let router = open_router(&fixture);

    let request = Request::builder()
        .method("POST")
        .uri("/containers/block-3/images")
        .body(Body::from("not an image"))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let json = json_body(response).await;
    assert_eq!(json["error"], "unsupported_format");
    assert!(fixture.blobs.is_empty().await);
}

#[tokio::test]
async fn test_upload_over_body_limit_rejected() {
    let fixture = MemoryFixture::new();
    let router = create_router(
        state(&fixture),
        RouterConfig::without_auth()
            .with_tracing(false)
            .with_max_upload_bytes(1024),
    );

    let request = Request::builder()
        .method("POST")
        .uri("/containers/block-3/images")
        .body(Body::from(gradient_png(512, 512)))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(fixture.blobs.is_empty().await);
}

#[tokio::test]
async fn test_unknown_descriptor_not_found() {
    let fixture = MemoryFixture::new();
    let router = open_router(&fixture);

    let request = Request::builder()
        .uri("/images/no-such-image/pyramid")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = json_body(response).await;
    assert_eq!(json["error"], "not_found");
}

// =============================================================================
// Object Proxy
// =============================================================================

#[tokio::test]
async fn test_object_served_with_immutable_caching() {
    let fixture = MemoryFixture::new();
    let router = open_router(&fixture);

    let request = Request::builder()
        .method("POST")
        .uri("/containers/block-3/images")
        .body(Body::from(gradient_png(2100, 300)))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let json = json_body(response).await;
    let preview_path = json["metadata"]["levels"][1]["path"]
        .as_str()
        .unwrap()
        .to_string();

    let request = Request::builder()
        .uri(format!("/objects/{}", preview_path))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/jpeg"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=31536000, immutable"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, fixture.blobs.get(&preview_path).await.unwrap());
}

#[tokio::test]
async fn test_unknown_object_not_found() {
    let fixture = MemoryFixture::new();
    let router = open_router(&fixture);

    let request = Request::builder()
        .uri("/objects/block-3/missing/10w.jpg")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = json_body(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn test_object_requires_session() {
    let fixture = MemoryFixture::new();
    let router = session_router(&fixture);

    let request = Request::builder()
        .uri("/objects/block-3/anything.png")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Credential Issuance
// =============================================================================

#[tokio::test]
async fn test_issue_credentials_sets_three_cookies() {
    let fixture = MemoryFixture::new();
    let router = session_router(&fixture);

    let request = Request::builder()
        .method("POST")
        .uri("/auth/edge-credentials")
        .header(header::AUTHORIZATION, bearer("user-42"))
        .header(header::ORIGIN, "https://viewer.example.com")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );

    let cookies: Vec<String> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cookies.len(), 3);
    assert_eq!(POLICY_COOKIE, "CloudFront-Policy");
    assert_eq!(SIGNATURE_COOKIE, "CloudFront-Signature");
    assert_eq!(KEY_PAIR_ID_COOKIE, "CloudFront-Key-Pair-Id");
    assert!(cookies[0].starts_with("CloudFront-Policy="));
    assert!(cookies[1].starts_with("CloudFront-Signature="));
    assert!(cookies[2].starts_with("CloudFront-Key-Pair-Id=K2JCJMDEHXQW5F;"));
    for cookie in &cookies {
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=43200"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=None"));
        assert!(cookie.contains("Domain=viewer.example.com"));
    }

    let json = json_body(response).await;
    assert_eq!(json["principal"], "user-42");
    assert_eq!(json["cookies_set"], true);
    assert_eq!(json["expires_in"], 43_200);

    // The cookies a browser would send back verify at the edge
    let header_value = cookies
        .iter()
        .map(|c| c.split(';').next().unwrap())
        .collect::<Vec<_>>()
        .join("; ");
    let credential = EdgeCredential::from_cookie_header(&header_value).unwrap();
    let now = json["expires_at"].as_u64().unwrap() - 60;
    assert!(test_verifier()
        .verify(
            &credential,
            "https://d111111abcdef8.cloudfront.net/block-3/x/1050w.jpg",
            None,
            now
        )
        .is_ok());
}

#[tokio::test]
async fn test_issue_credentials_insecure_cookies() {
    let fixture = MemoryFixture::new();
    let state = state(&fixture).with_cookies(CookieSettings {
        domain: None,
        insecure: true,
    });
    let router = create_router(state, RouterConfig::without_auth().with_tracing(false));

    let request = Request::builder()
        .method("POST")
        .uri("/auth/edge-credentials")
        .header(header::ORIGIN, "http://localhost:5173")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for value in response.headers().get_all(header::SET_COOKIE) {
        let cookie = value.to_str().unwrap();
        assert!(!cookie.contains("Secure"));
        assert!(!cookie.contains("Domain="));
        assert!(cookie.contains("SameSite=Lax"));
    }
}

#[tokio::test]
async fn test_issue_credentials_without_signing_key() {
    let fixture = MemoryFixture::new();
    let state = AppState::new(fixture.ingest.clone(), Arc::new(fixture.metadata.clone()));
    let router = create_router(state, RouterConfig::without_auth().with_tracing(false));

    let request = Request::builder()
        .method("POST")
        .uri("/auth/edge-credentials")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let json = json_body(response).await;
    assert_eq!(json["error"], "signing_key_unavailable");
}

// =============================================================================
// Session Authentication
// =============================================================================

#[tokio::test]
async fn test_missing_session_rejected() {
    let fixture = MemoryFixture::new();
    let router = session_router(&fixture);

    let request = Request::builder()
        .method("POST")
        .uri("/auth/edge-credentials")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let json = json_body(response).await;
    assert_eq!(json["error"], "missing_token");
}

#[tokio::test]
async fn test_session_from_other_secret_rejected() {
    let fixture = MemoryFixture::new();
    let router = session_router(&fixture);

    let (token, _) =
        SessionAuth::new("some-other-secret").issue("user-1", Duration::from_secs(60));
    let request = Request::builder()
        .method("POST")
        .uri("/auth/edge-credentials")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = json_body(response).await;
    assert_eq!(json["error"], "invalid_signature");
}

#[tokio::test]
async fn test_expired_session_rejected() {
    let fixture = MemoryFixture::new();
    let router = session_router(&fixture);

    let token = SessionAuth::new(SECRET).issue_with_expiry("user-1", 1);
    let request = Request::builder()
        .uri("/images/anything/pyramid")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = json_body(response).await;
    assert_eq!(json["error"], "session_expired");
}

#[tokio::test]
async fn test_upload_requires_session() {
    let fixture = MemoryFixture::new();
    let router = session_router(&fixture);

    let request = Request::builder()
        .method("POST")
        .uri("/containers/block-3/images")
        .body(Body::from(gradient_png(16, 16)))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(fixture.blobs.is_empty().await);

    let request = Request::builder()
        .method("POST")
        .uri("/containers/block-3/images")
        .header(header::AUTHORIZATION, bearer("user-1"))
        .body(Body::from(gradient_png(16, 16)))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}
