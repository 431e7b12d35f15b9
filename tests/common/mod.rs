use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use furlist_auth::auth::{
    Identity, IdentityResolver, IssuerDiscovery, IssuerMetadata, RecordingUserAgent, TokenSet,
};
use furlist_auth::storage::MemoryStorage;
use furlist_auth::{Client, Config, Result};

#[allow(dead_code)]
pub const DID: &str = "did:plc:fox123";
#[allow(dead_code)]
pub const HANDLE: &str = "fox.pds.example";

/// Default configuration with loopback http hosts allowed, so wiremock
/// servers can stand in for a PDS.
#[allow(dead_code)]
pub fn loopback_config() -> Config {
    let mut config = Config::default();
    config.oauth.allow_loopback_http = true;
    config
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// A client over in-memory storage plus handles to inspect it.
#[allow(dead_code)]
pub struct Harness {
    pub client: Client,
    pub durable: MemoryStorage,
    pub tab: MemoryStorage,
    pub agent: RecordingUserAgent,
}

/// Builds a client with default HTTP discovery and identity lookup.
#[allow(dead_code)]
pub fn harness() -> Harness {
    harness_with(|builder| builder)
}

/// Builds a client, letting the caller swap collaborators first.
#[allow(dead_code)]
pub fn harness_with(
    customize: impl FnOnce(furlist_auth::ClientBuilder) -> furlist_auth::ClientBuilder,
) -> Harness {
    let durable = MemoryStorage::new();
    let tab = MemoryStorage::new();
    let agent = RecordingUserAgent::new();

    let builder = Client::builder(loopback_config())
        .storage(Arc::new(durable.clone()))
        .tab_storage(Arc::new(tab.clone()))
        .user_agent(Arc::new(agent.clone()));

    let client = customize(builder).build().expect("client should build");
    Harness {
        client,
        durable,
        tab,
        agent,
    }
}

/// Reads a query parameter from a URL.
#[allow(dead_code)]
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// The redirect URL the issuer would send the browser back to.
#[allow(dead_code)]
pub fn callback_url(params: &[(&str, &str)]) -> Url {
    let mut url = Url::parse("http://127.0.0.1:8976/oauth/callback").expect("valid url");
    url.query_pairs_mut().extend_pairs(params);
    url
}

/// Authorization server metadata body for an issuer hosted at `base`.
#[allow(dead_code)]
pub fn server_metadata(base: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/oauth/authorize"),
        "token_endpoint": format!("{base}/oauth/token"),
        "revocation_endpoint": format!("{base}/oauth/revoke"),
        "scopes_supported": ["atproto", "transition:generic"],
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none", "private_key_jwt"],
        "dpop_signing_alg_values_supported": ["ES256"]
    })
}

/// Mounts a PDS that is its own issuer: no protected resource document,
/// RFC 8414 metadata at the root.
#[allow(dead_code)]
pub async fn mount_issuer(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_metadata(&server.uri())))
        .mount(server)
        .await;
}

/// Mounts `getSession` and `getProfile` for [`DID`]/[`HANDLE`].
#[allow(dead_code)]
pub async fn mount_identity(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/xrpc/com.atproto.server.getSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "did": DID,
            "handle": HANDLE,
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/xrpc/app.bsky.actor.getProfile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "did": DID,
            "handle": HANDLE,
            "avatar": "https://cdn.example/avatar.jpg",
        })))
        .mount(server)
        .await;
}

/// Token endpoint response body.
#[allow(dead_code)]
pub fn token_body(access: &str, refresh: &str, expires_in: i64) -> serde_json::Value {
    serde_json::json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "refresh_token": refresh,
        "scope": "atproto transition:generic",
        "sub": DID,
    })
}

/// Discovery that answers for any origin, with token and revocation
/// endpoints on `token_host`.  Counts calls and can be held open.
#[allow(dead_code)]
pub struct FixedDiscovery {
    token_host: Url,
    pub calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

#[allow(dead_code)]
impl FixedDiscovery {
    pub fn new(token_host: &str) -> Self {
        Self {
            token_host: Url::parse(token_host).expect("valid token host"),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Every `discover` waits for `gate` to be notified before answering.
    pub fn gated(token_host: &str, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(token_host)
        }
    }
}

#[async_trait]
impl IssuerDiscovery for FixedDiscovery {
    async fn discover(&self, origin: &Url) -> Result<IssuerMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(IssuerMetadata {
            issuer: origin.clone(),
            authorization_endpoint: origin.join("/oauth/authorize").expect("join"),
            token_endpoint: self.token_host.join("/oauth/token").expect("join"),
            revocation_endpoint: Some(self.token_host.join("/oauth/revoke").expect("join")),
            scopes_supported: vec!["atproto".to_string()],
        })
    }
}

/// Identity lookup that always returns [`DID`]/[`HANDLE`] without a DID
/// document, so the session keeps the origin as its PDS.
#[allow(dead_code)]
pub struct FixedIdentity {
    pub calls: AtomicUsize,
}

#[allow(dead_code)]
impl FixedIdentity {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IdentityResolver for FixedIdentity {
    async fn resolve(&self, _origin: &Url, _tokens: &TokenSet) -> Result<Identity> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Identity {
            did: DID.to_string(),
            handle: HANDLE.to_string(),
            avatar: None,
            pds_endpoint: None,
        })
    }
}
