//! The authenticated session and the state that outlives a page load
//!
//! - [`Session`]: the single logged-in identity plus its tokens
//! - [`SessionStore`]: the only writer of the persisted session record
//! - [`HydrationGate`]: the one-way "initial load finished" latch
//! - [`HostPreference`]: the last host used to log in, kept across logouts

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::token::TokenSet;
use crate::error::Result;
use crate::storage::{Storage, HOST_PREFERENCE_KEY};

pub mod hydration;
pub mod store;

pub use hydration::{HydrationGate, HydrationState};
pub use store::SessionStore;

/// An authenticated identity on a PDS.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Decentralized identifier, e.g. `did:plc:...`
    pub did: String,

    /// Handle at login time
    pub handle: String,

    /// Avatar image URL, if the profile has one
    #[serde(default)]
    pub avatar: Option<String>,

    /// Bearer credential for XRPC calls
    pub access_token: String,

    /// Refresh token, if the issuer granted one
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Granted scope
    #[serde(default)]
    pub scope: Option<String>,

    /// The PDS that hosts the account; XRPC calls go here
    pub pds_endpoint: Url,

    /// Token endpoint of the issuer that minted the tokens
    pub token_endpoint: Url,

    /// Revocation endpoint of that issuer, if it advertised one
    #[serde(default)]
    pub revocation_endpoint: Option<Url>,

    /// When `access_token` stops being valid
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("avatar", &self.avatar)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("scope", &self.scope)
            .field("pds_endpoint", &self.pds_endpoint.as_str())
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    /// Whether the access token has already expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// Whether the access token expires within `skew` (or already has).
    ///
    /// A session without a known expiry never needs a refresh.
    pub fn needs_refresh(&self, skew: Duration) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now() + skew)
    }

    /// Replaces the access token and expiry with a refresh result.
    ///
    /// A rotated refresh token replaces the old one; if the server sent none,
    /// the old one is kept.
    pub fn with_refreshed(mut self, tokens: TokenSet) -> Self {
        self.access_token = tokens.access_token;
        self.expires_at = tokens.expires_at;
        if tokens.refresh_token.is_some() {
            self.refresh_token = tokens.refresh_token;
        }
        if tokens.scope.is_some() {
            self.scope = tokens.scope;
        }
        self
    }
}

/// The last host a login was submitted with.
///
/// Lives under its own storage key, so clearing the session leaves it alone.
#[derive(Clone)]
pub struct HostPreference {
    storage: Arc<dyn Storage>,
}

impl HostPreference {
    /// Wraps the durable storage holding the preference.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// The stored origin, or `None` if no custom host was ever used.
    pub fn get(&self) -> Result<Option<String>> {
        Ok(self.storage.get(HOST_PREFERENCE_KEY)?.filter(|s| !s.is_empty()))
    }

    /// Records `origin` as the preferred host.
    pub fn set(&self, origin: &str) -> Result<()> {
        self.storage.set(HOST_PREFERENCE_KEY, origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    pub(crate) fn sample_session() -> Session {
        Session {
            did: "did:plc:abc123".to_string(),
            handle: "fox.pds.example".to_string(),
            avatar: None,
            access_token: "access-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            scope: Some("atproto".to_string()),
            pds_endpoint: Url::parse("https://pds.example").unwrap(),
            token_endpoint: Url::parse("https://pds.example/oauth/token").unwrap(),
            revocation_endpoint: None,
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[test]
    fn test_needs_refresh_respects_skew() {
        let mut session = sample_session();
        session.expires_at = Some(Utc::now() + Duration::seconds(30));
        assert!(session.needs_refresh(Duration::seconds(60)));
        assert!(!session.needs_refresh(Duration::seconds(0)));
        assert!(!session.is_expired());
    }

    #[test]
    fn test_session_without_expiry_never_needs_refresh() {
        let mut session = sample_session();
        session.expires_at = None;
        assert!(!session.needs_refresh(Duration::days(365)));
        assert!(!session.is_expired());
    }

    #[test]
    fn test_with_refreshed_keeps_refresh_token_when_not_rotated() {
        let session = sample_session();
        let updated = session.clone().with_refreshed(TokenSet {
            access_token: "access-2".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_at: None,
            scope: None,
            sub: None,
        });
        assert_eq!(updated.access_token, "access-2");
        assert_eq!(updated.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(updated.did, session.did);
        assert_eq!(updated.scope.as_deref(), Some("atproto"));
    }

    #[test]
    fn test_with_refreshed_rotates_refresh_token() {
        let updated = sample_session().with_refreshed(TokenSet {
            access_token: "access-2".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("refresh-2".to_string()),
            expires_at: None,
            scope: None,
            sub: None,
        });
        assert_eq!(updated.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let debug = format!("{:?}", sample_session());
        assert!(!debug.contains("access-1"));
        assert!(!debug.contains("refresh-1"));
        assert!(debug.contains("did:plc:abc123"));
    }

    #[test]
    fn test_session_serde_round_trip() {
        let session = sample_session();
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn test_host_preference_get_set() {
        let storage = MemoryStorage::new();
        let pref = HostPreference::new(Arc::new(storage.clone()));
        assert_eq!(pref.get().unwrap(), None);

        pref.set("https://pds.example").unwrap();
        assert_eq!(pref.get().unwrap().as_deref(), Some("https://pds.example"));
        assert_eq!(
            storage.get(HOST_PREFERENCE_KEY).unwrap().as_deref(),
            Some("https://pds.example")
        );
    }
}
