//! Callback handling: consume the pending login, redeem the code, install
//! the session.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::identity::IdentityResolver;
use super::pending::PendingLoginStore;
use super::token::TokenClient;
use crate::error::{AuthError, Result};
use crate::session::{Session, SessionStore};

/// Query parameters of the redirect back from the issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// `state`
    pub state: Option<String>,
    /// `code`, on success
    pub code: Option<String>,
    /// `error`, on failure
    pub error: Option<String>,
    /// `error_description`
    pub error_description: Option<String>,
    /// `iss` (RFC 9207)
    pub iss: Option<String>,
}

impl CallbackParams {
    /// Extracts the parameters from a full redirect URL.
    pub fn from_url(url: &Url) -> Self {
        Self::from_pairs(url.query_pairs())
    }

    /// Extracts the parameters from a raw query string.
    pub fn from_query(query: &str) -> Self {
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()))
    }

    fn from_pairs<'a>(pairs: impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "state" => params.state = value,
                "code" => params.code = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                "iss" => params.iss = value,
                _ => {}
            }
        }
        params
    }
}

/// Completes logins started by [`super::login::LoginInitiator`].
pub struct TokenExchanger {
    pending: PendingLoginStore,
    tokens: TokenClient,
    identity: Arc<dyn IdentityResolver>,
    store: Arc<SessionStore>,
    pending_ttl: Duration,
}

impl TokenExchanger {
    /// Assembles an exchanger.
    pub fn new(
        pending: PendingLoginStore,
        tokens: TokenClient,
        identity: Arc<dyn IdentityResolver>,
        store: Arc<SessionStore>,
        pending_ttl: Duration,
    ) -> Self {
        Self {
            pending,
            tokens,
            identity,
            store,
            pending_ttl,
        }
    }

    /// Handles one callback.
    ///
    /// The pending login is consumed before anything else happens, so a
    /// given `state` is accepted at most once whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidState`]: no unconsumed pending login matches;
    ///   no token request is made
    /// - [`AuthError::AuthorizationDenied`]: the issuer sent `error`
    /// - [`AuthError::TokenExchangeFailed`]: the code, identity lookup, or
    ///   issuer check failed
    /// - [`AuthError::Cancelled`]: `cancel` fired; nothing was installed
    pub async fn complete(
        &self,
        params: CallbackParams,
        cancel: &CancellationToken,
    ) -> Result<Session> {
        let state = params.state.as_deref().ok_or(AuthError::InvalidState)?;
        let pending = self.pending.take(state, self.pending_ttl)?;

        if let Some(error) = params.error {
            tracing::info!("Authorization denied by issuer: {}", error);
            return Err(AuthError::AuthorizationDenied {
                error,
                description: params.error_description,
            });
        }

        if let Some(iss) = params.iss.as_deref() {
            let matches = Url::parse(iss)
                .map(|iss| iss.origin() == pending.issuer.origin())
                .unwrap_or(false);
            if !matches {
                return Err(AuthError::TokenExchangeFailed {
                    reason: format!("callback issuer {iss} does not match {}", pending.issuer),
                });
            }
        }

        let code = params.code.ok_or_else(|| AuthError::TokenExchangeFailed {
            reason: "callback carried neither code nor error".to_string(),
        })?;

        let tokens = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            result = self.tokens.exchange_code(
                &pending.token_endpoint,
                &code,
                &pending.redirect_uri,
                &pending.verifier,
            ) => result?,
        };

        let identity = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            result = self.identity.resolve(&pending.origin, &tokens) => result?,
        };

        if let Some(sub) = tokens.sub.as_deref() {
            if sub != identity.did {
                return Err(AuthError::TokenExchangeFailed {
                    reason: format!("token subject {sub} does not match {}", identity.did),
                });
            }
        }

        let session = Session {
            did: identity.did,
            handle: identity.handle,
            avatar: identity.avatar,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            scope: tokens.scope,
            pds_endpoint: identity.pds_endpoint.unwrap_or(pending.origin),
            token_endpoint: pending.token_endpoint,
            revocation_endpoint: pending.revocation_endpoint,
            expires_at: tokens.expires_at,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            result = self.store.install(session.clone()) => result?,
        }

        tracing::info!("Logged in as {}", session.handle);
        Ok(session)
    }
}
