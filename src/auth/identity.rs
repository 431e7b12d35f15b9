//! Identity lookup after token exchange
//!
//! The token response does not reliably carry a handle or avatar, so the
//! callback asks the PDS who the new access token belongs to.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::token::TokenSet;
use crate::error::{AuthError, Result};

/// Who a freshly issued token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Decentralized identifier
    pub did: String,
    /// Current handle
    pub handle: String,
    /// Avatar image URL
    pub avatar: Option<String>,
    /// PDS service endpoint from the DID document, when present
    pub pds_endpoint: Option<Url>,
}

/// Resolves the identity behind an access token.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Looks up the account `tokens` were issued for, on the PDS at `origin`.
    ///
    /// # Errors
    ///
    /// Implementations report lookup failures as
    /// [`AuthError::TokenExchangeFailed`].
    async fn resolve(&self, origin: &Url, tokens: &TokenSet) -> Result<Identity>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetSessionResponse {
    did: String,
    handle: String,
    #[serde(default)]
    did_doc: Option<DidDocument>,
}

#[derive(Debug, Deserialize)]
struct DidDocument {
    #[serde(default)]
    service: Vec<DidService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidService {
    id: String,
    #[serde(default)]
    service_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    #[serde(default)]
    avatar: Option<String>,
}

impl DidDocument {
    /// The `#atproto_pds` service endpoint.
    fn pds_endpoint(&self) -> Option<Url> {
        self.service
            .iter()
            .find(|s| s.id == "#atproto_pds" || s.id.ends_with("#atproto_pds"))
            .and_then(|s| s.service_endpoint.as_deref())
            .and_then(|endpoint| Url::parse(endpoint).ok())
    }
}

/// [`IdentityResolver`] backed by `com.atproto.server.getSession` and
/// `app.bsky.actor.getProfile`.
#[derive(Debug, Clone)]
pub struct XrpcIdentityResolver {
    http: reqwest::Client,
}

impl XrpcIdentityResolver {
    /// Creates a resolver using `http`.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn fetch_avatar(
        &self,
        pds: &Url,
        did: &str,
        access_token: &str,
    ) -> Result<Option<String>> {
        let url = xrpc_url(pds, "app.bsky.actor.getProfile")?;
        let resp = self
            .http
            .get(url)
            .query(&[("actor", did)])
            .bearer_auth(access_token)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Api { status, body });
        }

        let profile: ProfileResponse = resp.json().await?;
        Ok(profile.avatar)
    }
}

#[async_trait]
impl IdentityResolver for XrpcIdentityResolver {
    async fn resolve(&self, origin: &Url, tokens: &TokenSet) -> Result<Identity> {
        let failed = |reason: String| AuthError::TokenExchangeFailed { reason };

        let url = xrpc_url(origin, "com.atproto.server.getSession")?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| failed(format!("identity lookup failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(failed(format!("identity lookup returned {}", resp.status())));
        }

        let session: GetSessionResponse = resp
            .json()
            .await
            .map_err(|e| failed(format!("failed to parse identity: {e}")))?;

        let pds_endpoint = session.did_doc.as_ref().and_then(DidDocument::pds_endpoint);
        let profile_host = pds_endpoint.as_ref().unwrap_or(origin);

        let avatar = match self
            .fetch_avatar(profile_host, &session.did, &tokens.access_token)
            .await
        {
            Ok(avatar) => avatar,
            Err(e) => {
                tracing::warn!("Avatar lookup for {} failed: {}", session.did, e);
                None
            }
        };

        Ok(Identity {
            did: session.did,
            handle: session.handle,
            avatar,
            pds_endpoint,
        })
    }
}

/// `<base>/xrpc/<nsid>`
pub fn xrpc_url(base: &Url, nsid: &str) -> Result<Url> {
    base.join(&format!("/xrpc/{nsid}"))
        .map_err(|e| AuthError::Config(format!("invalid XRPC endpoint for {nsid}: {e}")))
}
