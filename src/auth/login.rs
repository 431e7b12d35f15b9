//! Login initiator
//!
//! Turns a host string into a redirect to the issuer's authorization
//! endpoint.  One login may be in flight at a time: the pending flag is taken
//! on entry and released on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::discovery::{IssuerDiscovery, IssuerMetadata};
use super::host::{HostResolver, ResolvedHost};
use super::pending::{PendingLogin, PendingLoginStore};
use super::pkce::{self, PkceChallenge};
use super::redirect::UserAgent;
use crate::error::{AuthError, Result};
use crate::session::HostPreference;

/// The redirect that was issued for a login attempt.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Full authorization URL, including all query parameters
    pub url: Url,
    /// The `state` parameter embedded in `url`
    pub state: String,
    /// The PDS the user asked for
    pub host: ResolvedHost,
    /// The issuer that will handle the login
    pub issuer: Url,
}

/// Static parameters of every authorization request.
#[derive(Debug, Clone)]
pub struct LoginParams {
    /// Public client id
    pub client_id: String,
    /// Registered redirect URI
    pub redirect_uri: Url,
    /// Requested scope
    pub scope: String,
}

/// Drives a login from host input to the redirect.
pub struct LoginInitiator {
    resolver: HostResolver,
    discovery: Arc<dyn IssuerDiscovery>,
    pending: PendingLoginStore,
    preference: HostPreference,
    user_agent: Arc<dyn UserAgent>,
    params: LoginParams,
    in_flight: AtomicBool,
}

/// Releases the pending flag on drop.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AuthError::LoginAlreadyPending)?;
        Ok(Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LoginInitiator {
    /// Assembles an initiator from its collaborators.
    pub fn new(
        resolver: HostResolver,
        discovery: Arc<dyn IssuerDiscovery>,
        pending: PendingLoginStore,
        preference: HostPreference,
        user_agent: Arc<dyn UserAgent>,
        params: LoginParams,
    ) -> Self {
        Self {
            resolver,
            discovery,
            pending,
            preference,
            user_agent,
            params,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Whether a login is between invocation and redirect.
    pub fn is_pending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Starts a login for `input` (empty for the default issuer).
    ///
    /// On success the user agent has been redirected and a pending login
    /// recorded.  HostPreference is written only when `input` was non-empty
    /// and discovery succeeded.
    ///
    /// # Errors
    ///
    /// - [`AuthError::LoginAlreadyPending`] if another call is in flight
    /// - [`AuthError::InvalidHost`], [`AuthError::DiscoveryFailed`],
    ///   [`AuthError::UnsupportedIssuer`] from resolution and discovery
    /// - [`AuthError::Cancelled`] if `cancel` fires before the redirect
    pub async fn login(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<AuthorizationRequest> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;

        let host = self.resolver.resolve(input)?;
        tracing::info!("Starting login against {}", host.origin());

        let metadata = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            result = self.discovery.discover(host.url()) => result?,
        };

        if !metadata.scopes_supported.is_empty()
            && !metadata.scopes_supported.iter().any(|s| s == "atproto")
        {
            return Err(AuthError::UnsupportedIssuer {
                origin: host.origin(),
                reason: "issuer does not support the atproto scope".to_string(),
            });
        }

        let pkce = pkce::generate();
        let state = pkce::generate_state();

        if host.is_custom() {
            self.preference.set(&host.origin())?;
        }

        self.pending.record(&PendingLogin {
            state: state.clone(),
            verifier: pkce.verifier.clone(),
            redirect_uri: self.params.redirect_uri.to_string(),
            origin: host.url().clone(),
            issuer: metadata.issuer.clone(),
            token_endpoint: metadata.token_endpoint.clone(),
            revocation_endpoint: metadata.revocation_endpoint.clone(),
            created_at: Utc::now(),
        })?;

        let url = self.build_authorization_url(&metadata, &state, &pkce);

        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        self.user_agent.redirect(&url)?;
        tracing::debug!("Redirected to {}", metadata.authorization_endpoint);

        Ok(AuthorizationRequest {
            url,
            state,
            host,
            issuer: metadata.issuer,
        })
    }

    fn build_authorization_url(
        &self,
        metadata: &IssuerMetadata,
        state: &str,
        pkce: &PkceChallenge,
    ) -> Url {
        let mut url = metadata.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.params.client_id)
            .append_pair("redirect_uri", self.params.redirect_uri.as_str())
            .append_pair("scope", &self.params.scope)
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", PkceChallenge::METHOD);
        url
    }
}
