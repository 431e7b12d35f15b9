//! Issuer discovery integration tests using wiremock
//!
//! Covers `src/auth/discovery.rs` against real HTTP:
//!
//! - protected resource document pointing at a separate issuer
//! - `404` on the protected resource falls back to the origin itself
//! - `openid-configuration` is used when RFC 8414 metadata is absent
//! - network, status, and parse failures are `DiscoveryFailed`
//! - missing endpoints are `UnsupportedIssuer`
//! - plain http endpoints and foreign resource documents are `UnsupportedIssuer`

mod common;

use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use furlist_auth::auth::{HttpIssuerDiscovery, IssuerDiscovery};
use furlist_auth::AuthError;

/// Discovery that accepts the wiremock servers' loopback http URLs.
fn discovery() -> HttpIssuerDiscovery {
    HttpIssuerDiscovery::new(reqwest::Client::new()).allow_loopback_http(true)
}

fn origin_of(server: &MockServer) -> Url {
    Url::parse(&server.uri()).expect("valid server uri")
}

#[tokio::test]
async fn test_protected_resource_points_at_separate_issuer() {
    let pds = MockServer::start().await;
    let entryway = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": pds.uri(),
            "authorization_servers": [entryway.uri()],
        })))
        .expect(1)
        .mount(&pds)
        .await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::server_metadata(&entryway.uri())),
        )
        .expect(1)
        .mount(&entryway)
        .await;

    let meta = discovery().discover(&origin_of(&pds)).await.unwrap();

    assert_eq!(meta.issuer.origin(), origin_of(&entryway).origin());
    assert_eq!(
        meta.token_endpoint.as_str(),
        format!("{}/oauth/token", entryway.uri())
    );
    assert_eq!(
        meta.revocation_endpoint.unwrap().as_str(),
        format!("{}/oauth/revoke", entryway.uri())
    );
    assert!(meta.scopes_supported.contains(&"atproto".to_string()));
}

#[tokio::test]
async fn test_missing_protected_resource_uses_origin_as_issuer() {
    let pds = MockServer::start().await;
    common::mount_issuer(&pds).await;

    let meta = discovery().discover(&origin_of(&pds)).await.unwrap();
    assert_eq!(meta.issuer.origin(), origin_of(&pds).origin());
    assert_eq!(
        meta.authorization_endpoint.as_str(),
        format!("{}/oauth/authorize", pds.uri())
    );
}

#[tokio::test]
async fn test_falls_back_to_openid_configuration() {
    let pds = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::server_metadata(&pds.uri())))
        .expect(1)
        .mount(&pds)
        .await;

    let meta = discovery().discover(&origin_of(&pds)).await.unwrap();
    assert_eq!(
        meta.token_endpoint.as_str(),
        format!("{}/oauth/token", pds.uri())
    );
}

#[tokio::test]
async fn test_discovery_is_not_cached() {
    let pds = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::server_metadata(&pds.uri())))
        .expect(2)
        .mount(&pds)
        .await;

    let discovery = discovery();
    discovery.discover(&origin_of(&pds)).await.unwrap();
    discovery.discover(&origin_of(&pds)).await.unwrap();
}

#[tokio::test]
async fn test_no_metadata_anywhere_is_discovery_failed() {
    let pds = MockServer::start().await;

    let err = discovery().discover(&origin_of(&pds)).await.unwrap_err();
    match err {
        AuthError::DiscoveryFailed { origin, .. } => assert_eq!(origin, pds.uri()),
        other => panic!("expected DiscoveryFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_protected_resource_server_error_is_discovery_failed() {
    let pds = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&pds)
        .await;

    let err = discovery().discover(&origin_of(&pds)).await.unwrap_err();
    assert!(matches!(err, AuthError::DiscoveryFailed { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_unparseable_metadata_is_discovery_failed() {
    let pds = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&pds)
        .await;

    let err = discovery().discover(&origin_of(&pds)).await.unwrap_err();
    assert!(matches!(err, AuthError::DiscoveryFailed { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_unreachable_host_is_discovery_failed() {
    // Reserve a port, then release it so connections are refused.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let err = discovery()
        .discover(&Url::parse(&format!("http://127.0.0.1:{port}")).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::DiscoveryFailed { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_missing_token_endpoint_is_unsupported_issuer() {
    let pds = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": pds.uri(),
            "authorization_endpoint": format!("{}/oauth/authorize", pds.uri()),
        })))
        .mount(&pds)
        .await;

    let err = discovery().discover(&origin_of(&pds)).await.unwrap_err();
    assert!(matches!(err, AuthError::UnsupportedIssuer { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_empty_authorization_servers_is_unsupported_issuer() {
    let pds = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": pds.uri(),
            "authorization_servers": [],
        })))
        .mount(&pds)
        .await;

    let err = discovery().discover(&origin_of(&pds)).await.unwrap_err();
    assert!(matches!(err, AuthError::UnsupportedIssuer { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_http_endpoints_rejected_without_loopback_opt_in() {
    let server = MockServer::start().await;
    common::mount_issuer(&server).await;

    let strict = HttpIssuerDiscovery::new(reqwest::Client::new());
    let err = strict.discover(&origin_of(&server)).await.unwrap_err();
    match err {
        AuthError::UnsupportedIssuer { reason, .. } => assert!(reason.contains("not https")),
        other => panic!("expected UnsupportedIssuer, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cleartext_token_endpoint_is_unsupported_issuer() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut metadata = common::server_metadata(&server.uri());
    metadata["token_endpoint"] = serde_json::json!("http://tokens.example/oauth/token");
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata))
        .mount(&server)
        .await;

    let err = discovery().discover(&origin_of(&server)).await.unwrap_err();
    match err {
        AuthError::UnsupportedIssuer { reason, .. } => assert!(reason.contains("token_endpoint")),
        other => panic!("expected UnsupportedIssuer, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cleartext_authorization_server_is_unsupported_issuer() {
    let pds = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": pds.uri(),
            "authorization_servers": ["http://entryway.example"],
        })))
        .mount(&pds)
        .await;

    let err = discovery().discover(&origin_of(&pds)).await.unwrap_err();
    assert!(matches!(err, AuthError::UnsupportedIssuer { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_resource_document_for_another_host_is_unsupported_issuer() {
    let pds = MockServer::start().await;
    let entryway = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": "https://someone-else.example",
            "authorization_servers": [entryway.uri()],
        })))
        .mount(&pds)
        .await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::server_metadata(&entryway.uri())),
        )
        .expect(0)
        .mount(&entryway)
        .await;

    let err = discovery().discover(&origin_of(&pds)).await.unwrap_err();
    match err {
        AuthError::UnsupportedIssuer { reason, .. } => {
            assert!(reason.contains("someone-else.example"))
        }
        other => panic!("expected UnsupportedIssuer, got {other:?}"),
    }
}
