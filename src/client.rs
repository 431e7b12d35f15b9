//! Client façade
//!
//! [`Client`] is the whole contract exposed to the rest of the application:
//! the current session, login, callback completion, logout, the pending and
//! hydration flags, and authenticated XRPC calls.  Nothing else reads the
//! session storage directly.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::identity::xrpc_url;
use crate::auth::{
    AuthorizationRequest, CallbackParams, HostResolver, HttpIssuerDiscovery, IdentityResolver,
    IssuerDiscovery, LoginInitiator, LoginParams, PendingLoginStore, SystemBrowser, TokenClient,
    TokenExchanger, UserAgent, XrpcIdentityResolver,
};
use crate::config::Config;
use crate::error::{AuthError, Result};
use crate::session::{HostPreference, Session, SessionStore};
use crate::storage::{self, Storage};

/// Handle to the login and session lifecycle.  Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    store: Arc<SessionStore>,
    login: LoginInitiator,
    exchanger: TokenExchanger,
    tokens: TokenClient,
    preference: HostPreference,
    redirect_uri: Url,
    navigation: Mutex<CancellationToken>,
    logout_lock: tokio::sync::Mutex<()>,
}

/// Builder for [`Client`].  Anything not supplied is derived from the
/// configuration.
pub struct ClientBuilder {
    config: Config,
    storage: Option<Arc<dyn Storage>>,
    tab_storage: Option<Arc<dyn Storage>>,
    discovery: Option<Arc<dyn IssuerDiscovery>>,
    identity: Option<Arc<dyn IdentityResolver>>,
    user_agent: Option<Arc<dyn UserAgent>>,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Durable storage for the session and HostPreference.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Tab-scoped storage for the pending login.
    pub fn tab_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.tab_storage = Some(storage);
        self
    }

    /// Issuer discovery implementation.
    pub fn discovery(mut self, discovery: Arc<dyn IssuerDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Identity lookup implementation.
    pub fn identity_resolver(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Where login redirects are sent.
    pub fn user_agent(mut self, user_agent: Arc<dyn UserAgent>) -> Self {
        self.user_agent = Some(user_agent);
        self
    }

    /// HTTP client shared by discovery, token, and XRPC calls.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Validates the configuration and assembles the client.
    ///
    /// # Errors
    ///
    /// [`AuthError::Config`] for invalid configuration, or a storage error if
    /// a default backend cannot be opened.
    pub fn build(self) -> Result<Client> {
        let config = self.config;
        config.validate()?;

        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .timeout(Duration::from_secs(config.http.timeout_seconds))
                .user_agent(concat!("furlist-auth/", env!("CARGO_PKG_VERSION")))
                .build()?,
        };

        let storage = match self.storage {
            Some(storage) => storage,
            None => storage::open_durable(&config.storage)?,
        };
        let tab_storage = match self.tab_storage {
            Some(storage) => storage,
            None => storage::open_tab_scoped(&config.storage)?,
        };

        let discovery = self
            .discovery
            .unwrap_or_else(|| {
                Arc::new(
                    HttpIssuerDiscovery::new(http.clone())
                        .allow_loopback_http(config.oauth.allow_loopback_http),
                )
            });
        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(XrpcIdentityResolver::new(http.clone())));
        let user_agent = self.user_agent.unwrap_or_else(|| Arc::new(SystemBrowser));

        let client_id = config.oauth.client_id()?;
        let redirect_uri = config.oauth.redirect_url()?;
        let tokens = TokenClient::new(http.clone(), client_id.clone());
        let pending = PendingLoginStore::new(tab_storage);
        let preference = HostPreference::new(storage.clone());

        let store = Arc::new(
            SessionStore::new(storage)
                .with_refresh_skew(chrono::Duration::seconds(config.session.refresh_skew_seconds)),
        );

        let login = LoginInitiator::new(
            HostResolver::from_config(&config.oauth)?,
            discovery,
            pending.clone(),
            preference.clone(),
            user_agent,
            LoginParams {
                client_id,
                redirect_uri: redirect_uri.clone(),
                scope: config.oauth.scope.clone(),
            },
        );

        // Bounded by `Config::validate`.
        let pending_ttl = chrono::Duration::seconds(config.oauth.pending_ttl_seconds as i64);
        let exchanger =
            TokenExchanger::new(pending, tokens.clone(), identity, store.clone(), pending_ttl);

        Ok(Client {
            inner: Arc::new(Inner {
                http,
                store,
                login,
                exchanger,
                tokens,
                preference,
                redirect_uri,
                navigation: Mutex::new(CancellationToken::new()),
                logout_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }
}

impl Client {
    /// Starts building a client from `config`.
    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder {
            config,
            storage: None,
            tab_storage: None,
            discovery: None,
            identity: None,
            user_agent: None,
            http: None,
        }
    }

    /// Performs the one-time load of the persisted session.
    pub async fn hydrate(&self) -> Option<Session> {
        self.inner.store.hydrate().await
    }

    /// Waits until [`Client::hydrate`] has completed.
    pub async fn wait_hydrated(&self) {
        self.inner.store.hydration().wait_hydrated().await;
    }

    /// Whether the initial load has completed.
    pub fn is_hydrated(&self) -> bool {
        self.inner.store.hydration().is_hydrated()
    }

    /// The current session, if any.
    pub fn current(&self) -> Option<Session> {
        self.inner.store.current()
    }

    /// Receives every session change.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.inner.store.subscribe()
    }

    /// Whether a login is in flight.
    pub fn is_pending(&self) -> bool {
        self.inner.login.is_pending()
    }

    /// The last host a login was submitted with.
    pub fn host_preference(&self) -> Result<Option<String>> {
        self.inner.preference.get()
    }

    /// The redirect URI logins return to.
    pub fn redirect_uri(&self) -> &Url {
        &self.inner.redirect_uri
    }

    /// Starts a login for `host` (empty for the default issuer) and
    /// redirects the user agent.
    ///
    /// # Errors
    ///
    /// See [`LoginInitiator::login`].
    pub async fn login(&self, host: &str) -> Result<AuthorizationRequest> {
        let cancel = self.navigation_token();
        self.inner.login.login(host, &cancel).await
    }

    /// Completes a login from the redirect URL the issuer sent the user to.
    ///
    /// # Errors
    ///
    /// See [`TokenExchanger::complete`].
    pub async fn complete_login(&self, callback: &Url) -> Result<Session> {
        let cancel = self.navigation_token();
        self.inner
            .exchanger
            .complete(CallbackParams::from_url(callback), &cancel)
            .await
    }

    /// Logs out.
    ///
    /// Revokes the tokens at the issuer on a best-effort basis, then clears
    /// the session whatever the outcome.  Concurrent calls serialize; only
    /// the first finds a session.  Returns `true` if a session was cleared.
    pub async fn logout(&self) -> bool {
        let _serialized = self.inner.logout_lock.lock().await;

        let Some(session) = self.inner.store.current() else {
            tracing::debug!("Logout with no active session");
            if !self.is_hydrated() {
                // Drop any persisted record before hydration can load it.
                self.inner.store.clear().await;
            }
            return false;
        };

        self.revoke_best_effort(&session).await;

        let cleared = self.inner.store.clear().await;
        tracing::info!("Logged out {}", session.handle);
        cleared
    }

    async fn revoke_best_effort(&self, session: &Session) {
        let Some(endpoint) = session.revocation_endpoint.as_ref() else {
            tracing::debug!("Issuer advertises no revocation endpoint");
            return;
        };

        let (token, hint) = match session.refresh_token.as_deref() {
            Some(refresh) => (refresh, "refresh_token"),
            None => (session.access_token.as_str(), "access_token"),
        };

        if let Err(e) = self.inner.tokens.revoke(endpoint, token, hint).await {
            tracing::warn!("Token revocation failed, clearing locally anyway: {}", e);
        }
    }

    /// Authenticated GET of `/xrpc/<nsid>` on the session's PDS.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotAuthenticated`] without a session,
    /// [`AuthError::SessionExpired`] if the refresh token was rejected,
    /// [`AuthError::Api`] for a non-success response.
    pub async fn xrpc_get(
        &self,
        nsid: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value> {
        let session = self.authenticated_session().await?;
        let url = xrpc_url(&session.pds_endpoint, nsid)?;
        let request = self
            .inner
            .http
            .get(url)
            .query(params)
            .bearer_auth(&session.access_token);
        send_xrpc(request).await
    }

    /// Authenticated POST of a JSON body to `/xrpc/<nsid>`.
    ///
    /// # Errors
    ///
    /// As for [`Client::xrpc_get`].
    pub async fn xrpc_post(
        &self,
        nsid: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let session = self.authenticated_session().await?;
        let url = xrpc_url(&session.pds_endpoint, nsid)?;
        let request = self
            .inner
            .http
            .post(url)
            .json(body)
            .bearer_auth(&session.access_token);
        send_xrpc(request).await
    }

    /// Refreshes if needed and returns the session to authenticate with.
    async fn authenticated_session(&self) -> Result<Session> {
        self.inner
            .store
            .refresh(&self.inner.tokens)
            .await?
            .ok_or(AuthError::NotAuthenticated)
    }

    /// Cancels in-flight discovery and token exchange, as leaving the page
    /// would.  Later operations start with a fresh token.
    pub fn navigate_away(&self) {
        let mut token = self
            .inner
            .navigation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
        drop(token);
        tracing::debug!("Navigation cancelled in-flight login work");
    }

    fn navigation_token(&self) -> CancellationToken {
        self.inner
            .navigation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn send_xrpc(request: reqwest::RequestBuilder) -> Result<serde_json::Value> {
    let resp = request.send().await?;
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(AuthError::Api {
            status: status.as_u16(),
            body,
        });
    }

    if body.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}
