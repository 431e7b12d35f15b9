//! Token endpoint calls: code exchange, refresh, and revocation

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::{AuthError, Result};

/// Tokens returned by the token endpoint, with `expires_in` converted to an
/// absolute instant.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    /// Bearer credential for XRPC calls
    pub access_token: String,

    /// Token type as reported by the server (normally `Bearer`)
    pub token_type: String,

    /// Refresh token, when issued
    pub refresh_token: Option<String>,

    /// Absolute expiry of `access_token`, if the server sent `expires_in`
    pub expires_at: Option<DateTime<Utc>>,

    /// Granted scope
    pub scope: Option<String>,

    /// The DID the tokens were issued for (`sub`), when present
    pub sub: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("sub", &self.sub)
            .finish()
    }
}

/// Raw JSON response from the token endpoint.
#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    sub: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Longest access token lifetime taken at face value (one year).
const MAX_EXPIRES_IN: u64 = 365 * 24 * 60 * 60;

impl TokenResponse {
    fn into_token_set(self) -> Result<TokenSet> {
        // DPoP-bound tokens cannot be presented as bearer credentials.
        if !self.token_type.eq_ignore_ascii_case("bearer") {
            return Err(exchange_failed(format!(
                "unsupported token_type '{}'",
                self.token_type
            )));
        }

        let expires_at = self.expires_in.and_then(|secs| {
            let secs = secs.min(MAX_EXPIRES_IN) as i64;
            Utc::now().checked_add_signed(chrono::Duration::seconds(secs))
        });

        Ok(TokenSet {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token,
            expires_at,
            scope: self.scope,
            sub: self.sub,
        })
    }
}

/// RFC 6749 section 5.2 error body.
#[derive(Debug, serde::Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Public-client token endpoint caller.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    client_id: String,
}

impl TokenClient {
    /// Creates a token client identified by `client_id`.
    pub fn new(http: reqwest::Client, client_id: impl Into<String>) -> Self {
        Self {
            http,
            client_id: client_id.into(),
        }
    }

    /// The client id sent with every request.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Exchanges an authorization code and PKCE verifier for tokens.
    ///
    /// # Errors
    ///
    /// Any transport failure, non-success status, unparseable body, or
    /// non-bearer token type is reported as [`AuthError::TokenExchangeFailed`].
    pub async fn exchange_code(
        &self,
        token_endpoint: &Url,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenSet> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];

        let resp = self
            .http
            .post(token_endpoint.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| exchange_failed(format!("token request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(exchange_failed(describe_failure(status, &body)));
        }

        let raw: TokenResponse = resp
            .json()
            .await
            .map_err(|e| exchange_failed(format!("failed to parse token response: {e}")))?;

        raw.into_token_set()
    }

    /// Redeems a refresh token for a fresh access token.
    ///
    /// # Errors
    ///
    /// A `400`/`401` carrying an OAuth error body means the refresh token was
    /// rejected and yields [`AuthError::SessionExpired`].  Anything else that
    /// goes wrong is [`AuthError::TokenExchangeFailed`].
    pub async fn refresh(&self, token_endpoint: &Url, refresh_token: &str) -> Result<TokenSet> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];

        tracing::debug!("Refreshing access token at {}", token_endpoint);

        let resp = self
            .http
            .post(token_endpoint.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| exchange_failed(format!("refresh request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let rejected = matches!(status.as_u16(), 400 | 401)
                && serde_json::from_str::<OAuthErrorBody>(&body).is_ok();
            if rejected {
                tracing::info!("Refresh token rejected: {}", describe_failure(status, &body));
                return Err(AuthError::SessionExpired);
            }
            return Err(exchange_failed(describe_failure(status, &body)));
        }

        let raw: TokenResponse = resp
            .json()
            .await
            .map_err(|e| exchange_failed(format!("failed to parse refresh response: {e}")))?;

        raw.into_token_set()
    }

    /// Revokes `token` (RFC 7009).
    ///
    /// `hint` is `refresh_token` or `access_token`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] on transport failure and
    /// [`AuthError::Api`] on a non-success status.
    pub async fn revoke(&self, revocation_endpoint: &Url, token: &str, hint: &str) -> Result<()> {
        let params = [
            ("token", token),
            ("token_type_hint", hint),
            ("client_id", self.client_id.as_str()),
        ];

        let resp = self
            .http
            .post(revocation_endpoint.clone())
            .form(&params)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Api { status, body });
        }

        Ok(())
    }
}

/// Renders a failed token response, preferring the OAuth error code.
fn describe_failure(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(err) => match err.error_description {
            Some(desc) => format!("{status}: {} ({desc})", err.error),
            None => format!("{status}: {}", err.error),
        },
        Err(_) => format!("token endpoint returned {status}"),
    }
}

fn exchange_failed(reason: String) -> AuthError {
    AuthError::TokenExchangeFailed { reason }
}
