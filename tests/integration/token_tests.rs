//! Edge credential tests.
//!
//! Tests verify:
//! - Issued credentials verify with only the public key
//! - The canonical policy carries the scope and expiry
//! - Expiry, scope and source restrictions are enforced
//! - Tampered or mismatched credentials are rejected

use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pyramid_edge::token::encoding;
use pyramid_edge::{
    AccessPolicy, CookieOptions, EdgeCredential, EdgeVerifier, IpRange, KeySource, PolicySigner,
    Principal, ResourceScope, TokenError, TokenIssuer, VerifyError, CREDENTIAL_TTL,
};
use url::Url;

use super::test_utils::{
    test_issuer, test_public_key_pem, test_verifier, TEST_DISTRIBUTION, TEST_KEY_PAIR_ID,
};

const ISSUED_AT: u64 = 1_767_225_600;

fn issued_at() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(ISSUED_AT)
}

fn resource(path: &str) -> String {
    format!("{}/{}", TEST_DISTRIBUTION, path)
}

// =============================================================================
// Issue and Verify
// =============================================================================

#[test]
fn test_issued_credential_verifies() {
    let issued = test_issuer()
        .issue_at(
            &Principal::new("user-1"),
            &ResourceScope::Distribution,
            None,
            issued_at(),
        )
        .unwrap();

    assert_eq!(issued.expires_in, CREDENTIAL_TTL);
    assert_eq!(issued.expires_at, ISSUED_AT + 43_200);
    assert_eq!(issued.resource, format!("{}/*", TEST_DISTRIBUTION));
    assert_eq!(issued.credential.key_pair_id, TEST_KEY_PAIR_ID);

    let policy = test_verifier()
        .verify(
            &issued.credential,
            &resource("block-1/abc/2477w.jpg"),
            None,
            ISSUED_AT + 60,
        )
        .unwrap();
    assert_eq!(policy, issued.policy);
}

#[test]
fn test_canonical_policy_in_cookie() {
    let issued = test_issuer()
        .issue_at(
            &Principal::new("user-1"),
            &ResourceScope::Distribution,
            None,
            issued_at(),
        )
        .unwrap();

    let policy = issued.credential.policy_bytes().unwrap();
    assert_eq!(
        String::from_utf8(policy).unwrap(),
        format!(
            r#"{{"Statement":[{{"Resource":"{}/*","Condition":{{"DateLessThan":{{"AWS:EpochTime":{}}}}}}}]}}"#,
            TEST_DISTRIBUTION,
            ISSUED_AT + 43_200
        )
    );
}

#[test]
fn test_credential_values_are_transport_safe() {
    let issued = test_issuer()
        .issue(&Principal::new("user-1"), &ResourceScope::Distribution)
        .unwrap();

    for (_, value) in issued.credential.pairs() {
        assert!(encoding::is_transport_safe(value), "unsafe value: {}", value);
    }
}

#[test]
fn test_verifier_from_public_pem() {
    let verifier = EdgeVerifier::new()
        .with_pem(TEST_KEY_PAIR_ID, &test_public_key_pem())
        .unwrap();
    let issued = test_issuer()
        .issue_at(
            &Principal::new("user-1"),
            &ResourceScope::Distribution,
            None,
            issued_at(),
        )
        .unwrap();

    assert!(verifier
        .verify(&issued.credential, &resource("x.png"), None, ISSUED_AT)
        .is_ok());
}

#[test]
fn test_cookie_round_trip_through_header() {
    let issued = test_issuer()
        .issue_at(
            &Principal::new("user-1"),
            &ResourceScope::Distribution,
            None,
            issued_at(),
        )
        .unwrap();

    // What a browser sends back: name=value pairs from the Set-Cookie headers
    let header = issued
        .credential
        .set_cookie_headers(&CookieOptions::new(issued.expires_in))
        .iter()
        .map(|cookie| cookie.split(';').next().unwrap().to_string())
        .collect::<Vec<_>>()
        .join("; ");

    let credential = EdgeCredential::from_cookie_header(&header).unwrap();
    assert_eq!(credential, issued.credential);
    assert!(test_verifier()
        .verify(&credential, &resource("a.png"), None, ISSUED_AT + 1)
        .is_ok());
}

// =============================================================================
// Expiry
// =============================================================================

#[test]
fn test_expiry_boundary() {
    let issued = test_issuer()
        .issue_at(
            &Principal::new("user-1"),
            &ResourceScope::Distribution,
            None,
            issued_at(),
        )
        .unwrap();
    let verifier = test_verifier();
    let url = resource("a.png");

    assert!(verifier
        .verify(&issued.credential, &url, None, issued.expires_at - 1)
        .is_ok());
    assert_eq!(
        verifier.verify(&issued.credential, &url, None, issued.expires_at),
        Err(VerifyError::Expired {
            expired_at: issued.expires_at,
            current_time: issued.expires_at,
        })
    );
}

// =============================================================================
// Scope and Source
// =============================================================================

#[test]
fn test_prefix_scope() {
    let issued = test_issuer()
        .issue_at(
            &Principal::new("user-1"),
            &ResourceScope::Prefix("block-1".to_string()),
            None,
            issued_at(),
        )
        .unwrap();
    let verifier = test_verifier();

    assert!(verifier
        .verify(&issued.credential, &resource("block-1/i/10w.jpg"), None, ISSUED_AT)
        .is_ok());
    assert!(matches!(
        verifier.verify(&issued.credential, &resource("block-2/i/10w.jpg"), None, ISSUED_AT),
        Err(VerifyError::OutOfScope { .. })
    ));
}

#[test]
fn test_other_distribution_out_of_scope() {
    let issued = test_issuer()
        .issue_at(
            &Principal::new("user-1"),
            &ResourceScope::Distribution,
            None,
            issued_at(),
        )
        .unwrap();

    assert!(matches!(
        test_verifier().verify(
            &issued.credential,
            "https://elsewhere.example.com/a.png",
            None,
            ISSUED_AT
        ),
        Err(VerifyError::OutOfScope { .. })
    ));
}

#[test]
fn test_source_restriction() {
    let range: IpRange = "198.51.100.0/24".parse().unwrap();
    let issued = test_issuer()
        .issue_at(
            &Principal::new("user-1"),
            &ResourceScope::Distribution,
            Some(range),
            issued_at(),
        )
        .unwrap();
    let verifier = test_verifier();
    let url = resource("a.png");

    let inside: IpAddr = "198.51.100.7".parse().unwrap();
    let outside: IpAddr = "203.0.113.7".parse().unwrap();

    assert!(verifier
        .verify(&issued.credential, &url, Some(inside), ISSUED_AT)
        .is_ok());
    assert!(matches!(
        verifier.verify(&issued.credential, &url, Some(outside), ISSUED_AT),
        Err(VerifyError::SourceNotAllowed(_))
    ));
    assert!(matches!(
        verifier.verify(&issued.credential, &url, None, ISSUED_AT),
        Err(VerifyError::SourceNotAllowed(_))
    ));
}

// =============================================================================
// Tampering
// =============================================================================

#[test]
fn test_tampered_policy_rejected() {
    let issued = test_issuer()
        .issue_at(
            &Principal::new("user-1"),
            &ResourceScope::Prefix("block-1".to_string()),
            None,
            issued_at(),
        )
        .unwrap();

    // Widen the scope and push the expiry out, keeping the signature
    let forged = AccessPolicy::new(format!("{}/*", TEST_DISTRIBUTION), ISSUED_AT + 10_000_000);
    let mut credential = issued.credential.clone();
    credential.policy = encoding::encode(&forged.canonical_bytes().unwrap());

    assert_eq!(
        test_verifier().verify(&credential, &resource("block-2/a.png"), None, ISSUED_AT),
        Err(VerifyError::InvalidSignature)
    );
}

#[test]
fn test_signature_from_other_key_rejected() {
    let other_key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let other_pem = rsa::pkcs8::EncodePrivateKey::to_pkcs8_pem(
        &other_key,
        rsa::pkcs8::LineEnding::LF,
    )
    .unwrap()
    .to_string();

    // Right key pair id, wrong private key
    let impostor = TokenIssuer::new(
        PolicySigner::new(KeySource::Pem(other_pem), TEST_KEY_PAIR_ID),
        Url::parse(TEST_DISTRIBUTION).unwrap(),
    );
    let issued = impostor
        .issue_at(
            &Principal::new("mallory"),
            &ResourceScope::Distribution,
            None,
            issued_at(),
        )
        .unwrap();

    assert_eq!(
        test_verifier().verify(&issued.credential, &resource("a.png"), None, ISSUED_AT),
        Err(VerifyError::InvalidSignature)
    );
}

#[test]
fn test_unknown_key_pair_rejected() {
    let issued = test_issuer()
        .issue_at(
            &Principal::new("user-1"),
            &ResourceScope::Distribution,
            None,
            issued_at(),
        )
        .unwrap();
    let mut credential = issued.credential;
    credential.key_pair_id = "KOTHER".to_string();

    assert_eq!(
        test_verifier().verify(&credential, &resource("a.png"), None, ISSUED_AT),
        Err(VerifyError::UnknownKeyPair("KOTHER".to_string()))
    );
}

// =============================================================================
// Signing Key Failures
// =============================================================================

#[test]
fn test_missing_key_file_is_unavailable() {
    let issuer = TokenIssuer::new(
        PolicySigner::new(
            KeySource::File("/nonexistent/pyramid-edge/key.pem".into()),
            TEST_KEY_PAIR_ID,
        ),
        Url::parse(TEST_DISTRIBUTION).unwrap(),
    );

    let result = issuer.issue(&Principal::new("user-1"), &ResourceScope::Distribution);
    assert!(matches!(result, Err(TokenError::SigningKeyUnavailable { .. })));
}

#[test]
fn test_key_read_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signing.pem");
    std::fs::write(&path, super::test_utils::test_private_key_pem()).unwrap();

    let issuer = TokenIssuer::new(
        PolicySigner::new(KeySource::File(path), TEST_KEY_PAIR_ID),
        Url::parse(TEST_DISTRIBUTION).unwrap(),
    );
    let issued = issuer
        .issue_at(
            &Principal::new("user-1"),
            &ResourceScope::Distribution,
            None,
            issued_at(),
        )
        .unwrap();

    assert!(test_verifier()
        .verify(&issued.credential, &resource("a.png"), None, ISSUED_AT)
        .is_ok());
}
