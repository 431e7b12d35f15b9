//! Issuer discovery for a PDS origin
//!
//! Given the canonical origin of a Personal Data Server, locate the OAuth
//! authorization server protecting it and fetch that server's metadata.
//!
//! # Discovery sequence
//!
//! 1. GET `<origin>/.well-known/oauth-protected-resource` (RFC 9728).  The
//!    first entry of `authorization_servers` is the issuer.  A `404` means
//!    the origin is its own issuer (entryway hosts).
//! 2. GET the issuer's RFC 8414 metadata, trying
//!    `/.well-known/oauth-authorization-server` before
//!    `/.well-known/openid-configuration`.
//! 3. Validate the document into [`IssuerMetadata`].  The issuer and every
//!    endpoint must be https (loopback http only when explicitly allowed).
//!
//! Nothing is cached: every login attempt re-runs discovery.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::is_loopback;
use crate::error::{AuthError, Result};

/// The authentication method used at the token endpoint.  This client is a
/// public client, so it never holds a secret.
pub const PUBLIC_CLIENT_AUTH_METHOD: &str = "none";

/// Validated authorization server metadata for one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerMetadata {
    /// Issuer identifier of the authorization server
    pub issuer: Url,

    /// Where the user agent is redirected to authorize
    pub authorization_endpoint: Url,

    /// Where codes and refresh tokens are redeemed
    pub token_endpoint: Url,

    /// RFC 7009 revocation endpoint, when advertised
    pub revocation_endpoint: Option<Url>,

    /// Scopes advertised by the server (may be empty)
    pub scopes_supported: Vec<String>,
}

/// RFC 9728 protected resource metadata; only the fields discovery reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The protected resource identifier
    #[serde(default)]
    pub resource: Option<String>,

    /// Issuers that protect this resource
    #[serde(default)]
    pub authorization_servers: Vec<String>,
}

/// Raw RFC 8414 document.  Every field is optional here so that a missing
/// required field is reported as [`AuthError::UnsupportedIssuer`] rather than
/// as a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawServerMetadata {
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
    #[serde(default)]
    revocation_endpoint: Option<String>,
    #[serde(default)]
    scopes_supported: Option<Vec<String>>,
    #[serde(default)]
    code_challenge_methods_supported: Option<Vec<String>>,
    #[serde(default)]
    token_endpoint_auth_methods_supported: Option<Vec<String>>,
    #[serde(flatten)]
    #[allow(dead_code)]
    extra: HashMap<String, serde_json::Value>,
}

/// Resolves a PDS origin into issuer metadata.
#[async_trait]
pub trait IssuerDiscovery: Send + Sync {
    /// Discover the issuer protecting `origin`.
    ///
    /// # Errors
    ///
    /// [`AuthError::DiscoveryFailed`] for network or parse failures,
    /// [`AuthError::UnsupportedIssuer`] when required metadata is missing.
    async fn discover(&self, origin: &Url) -> Result<IssuerMetadata>;
}

/// [`IssuerDiscovery`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIssuerDiscovery {
    http: reqwest::Client,
    allow_loopback_http: bool,
}

impl HttpIssuerDiscovery {
    /// Creates a discovery client sharing `http`'s connection pool.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            allow_loopback_http: false,
        }
    }

    /// Also accept `http://localhost` / `http://127.0.0.1` issuers and
    /// endpoints.
    pub fn allow_loopback_http(mut self, allow: bool) -> Self {
        self.allow_loopback_http = allow;
        self
    }

    /// Fetches the protected resource document and returns the issuer.
    ///
    /// A `404` yields `origin` itself.
    async fn resolve_issuer(&self, origin: &Url) -> Result<Url> {
        let url = well_known(origin, "oauth-protected-resource");
        tracing::debug!("Fetching protected resource metadata from {}", url);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| {
                discovery_failed(origin, format!("resource metadata fetch failed: {e}"))
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!("No protected resource metadata; {} is its own issuer", origin);
            return Ok(origin.clone());
        }

        if !resp.status().is_success() {
            return Err(discovery_failed(
                origin,
                format!("resource metadata endpoint returned {}", resp.status()),
            ));
        }

        let meta: ProtectedResourceMetadata = resp.json().await.map_err(|e| {
            discovery_failed(origin, format!("failed to parse resource metadata: {e}"))
        })?;

        if let Some(resource) = &meta.resource {
            let same_origin = Url::parse(resource)
                .map(|r| r.origin() == origin.origin())
                .unwrap_or(false);
            if !same_origin {
                return Err(unsupported(
                    origin,
                    format!("resource metadata describes '{resource}', not this host"),
                ));
            }
        }

        let first = meta.authorization_servers.first().ok_or_else(|| {
            unsupported(origin, "resource metadata lists no authorization servers")
        })?;

        let issuer = Url::parse(first).map_err(|e| {
            unsupported(origin, format!("invalid authorization server '{first}': {e}"))
        })?;
        self.require_secure(origin, "authorization server", &issuer)?;
        Ok(issuer)
    }

    fn require_secure(&self, origin: &Url, what: &str, url: &Url) -> Result<()> {
        if url.scheme() == "https" || (self.allow_loopback_http && is_loopback(url)) {
            return Ok(());
        }
        Err(unsupported(origin, format!("{what} {url} is not https")))
    }

    /// Tries each well-known location in turn and returns the first document
    /// that parses.
    async fn fetch_server_metadata(
        &self,
        origin: &Url,
        issuer: &Url,
    ) -> Result<RawServerMetadata> {
        let mut last_failure = String::from("no metadata location responded");

        for candidate in build_candidate_urls(issuer) {
            tracing::debug!("Trying authorization server metadata at {}", candidate);

            let resp = match self.http.get(candidate.clone()).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_failure = format!("{candidate}: {e}");
                    continue;
                }
            };

            if !resp.status().is_success() {
                last_failure = format!("{candidate} returned {}", resp.status());
                continue;
            }

            match resp.json::<RawServerMetadata>().await {
                Ok(raw) => return Ok(raw),
                Err(e) => last_failure = format!("{candidate}: unparseable metadata: {e}"),
            }
        }

        Err(discovery_failed(origin, last_failure))
    }
}

#[async_trait]
impl IssuerDiscovery for HttpIssuerDiscovery {
    async fn discover(&self, origin: &Url) -> Result<IssuerMetadata> {
        let issuer = self.resolve_issuer(origin).await?;
        let raw = self.fetch_server_metadata(origin, &issuer).await?;
        let metadata = validate(origin, &issuer, raw)?;

        let endpoints = [
            ("authorization_endpoint", &metadata.authorization_endpoint),
            ("token_endpoint", &metadata.token_endpoint),
        ];
        for (what, url) in endpoints {
            self.require_secure(origin, what, url)?;
        }
        if let Some(revocation) = &metadata.revocation_endpoint {
            self.require_secure(origin, "revocation_endpoint", revocation)?;
        }

        tracing::info!(
            "Discovered issuer {} for {}",
            metadata.issuer,
            origin.origin().ascii_serialization()
        );
        Ok(metadata)
    }
}

/// `<origin>/.well-known/<name>`
fn well_known(base: &Url, name: &str) -> Url {
    let mut url = base.clone();
    url.set_path(&format!("/.well-known/{name}"));
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Candidate metadata URLs for an issuer, in the order they are tried.
///
/// For an issuer with a path component the path-inserted RFC 8414 forms come
/// first, followed by the root forms.
fn build_candidate_urls(issuer: &Url) -> Vec<Url> {
    let path = issuer.path().trim_end_matches('/').to_string();
    let mut candidates = Vec::with_capacity(4);

    for name in ["oauth-authorization-server", "openid-configuration"] {
        let mut url = well_known(issuer, name);
        if !path.is_empty() {
            url.set_path(&format!("/.well-known/{name}{path}"));
        }
        candidates.push(url);
    }

    if !path.is_empty() {
        candidates.push(well_known(issuer, "oauth-authorization-server"));
        candidates.push(well_known(issuer, "openid-configuration"));
    }

    candidates
}

fn validate(
    origin: &Url,
    expected_issuer: &Url,
    raw: RawServerMetadata,
) -> Result<IssuerMetadata> {
    if let Some(advertised) = &raw.issuer {
        let advertised = Url::parse(advertised)
            .map_err(|e| unsupported(origin, format!("invalid issuer '{advertised}': {e}")))?;
        if advertised.origin() != expected_issuer.origin() {
            return Err(unsupported(
                origin,
                format!("issuer mismatch: expected {expected_issuer}, got {advertised}"),
            ));
        }
    }

    let authorization_endpoint =
        required_url(origin, "authorization_endpoint", raw.authorization_endpoint)?;
    let token_endpoint = required_url(origin, "token_endpoint", raw.token_endpoint)?;

    let methods = raw.code_challenge_methods_supported.unwrap_or_default();
    if !methods.is_empty() && !methods.iter().any(|m| m == "S256") {
        return Err(unsupported(origin, "PKCE S256 not supported"));
    }

    let auth_methods = raw.token_endpoint_auth_methods_supported.unwrap_or_default();
    if !auth_methods.is_empty() && !auth_methods.iter().any(|m| m == PUBLIC_CLIENT_AUTH_METHOD) {
        return Err(unsupported(origin, "public clients (auth method 'none') not supported"));
    }

    let revocation_endpoint = match raw.revocation_endpoint {
        Some(s) => match Url::parse(&s) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("Ignoring invalid revocation_endpoint '{}': {}", s, e);
                None
            }
        },
        None => None,
    };

    Ok(IssuerMetadata {
        issuer: expected_issuer.clone(),
        authorization_endpoint,
        token_endpoint,
        revocation_endpoint,
        scopes_supported: raw.scopes_supported.unwrap_or_default(),
    })
}

fn required_url(origin: &Url, field: &str, value: Option<String>) -> Result<Url> {
    let value = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| unsupported(origin, format!("metadata is missing {field}")))?;
    Url::parse(&value)
        .map_err(|e| unsupported(origin, format!("invalid {field} '{value}': {e}")))
}

fn discovery_failed(origin: &Url, reason: impl Into<String>) -> AuthError {
    AuthError::DiscoveryFailed {
        origin: origin.origin().ascii_serialization(),
        reason: reason.into(),
    }
}

fn unsupported(origin: &Url, reason: impl Into<String>) -> AuthError {
    AuthError::UnsupportedIssuer {
        origin: origin.origin().ascii_serialization(),
        reason: reason.into(),
    }
}
