//! Pending login records
//!
//! A [`PendingLogin`] bridges the redirect to the authorization server and
//! the redirect back.  It lives in tab-scoped storage under one slot: a new
//! login replaces an abandoned one, and a callback consumes it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};
use crate::storage::{Storage, PENDING_LOGIN_KEY};

const PENDING_RECORD_VERSION: u32 = 1;

/// State carried across the authorization redirect.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    /// The `state` parameter sent with the authorization request
    pub state: String,

    /// PKCE verifier matching the challenge that was sent
    pub verifier: String,

    /// Redirect URI sent with the authorization request
    pub redirect_uri: String,

    /// Canonical origin of the PDS the user asked for
    pub origin: Url,

    /// Issuer that will redirect back
    pub issuer: Url,

    /// Where the code is redeemed
    pub token_endpoint: Url,

    /// Where tokens are revoked at logout
    #[serde(default)]
    pub revocation_endpoint: Option<Url>,

    /// When the login was started
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for PendingLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingLogin")
            .field("state", &"<redacted>")
            .field("verifier", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("origin", &self.origin.as_str())
            .field("issuer", &self.issuer.as_str())
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct PendingRecord {
    version: u32,
    login: PendingLogin,
}

/// The pending-login slot in tab storage.
#[derive(Clone)]
pub struct PendingLoginStore {
    storage: Arc<dyn Storage>,
}

impl PendingLoginStore {
    /// Wraps tab-scoped `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Stores `login`, replacing whatever occupied the slot.
    pub fn record(&self, login: &PendingLogin) -> Result<()> {
        let record = PendingRecord {
            version: PENDING_RECORD_VERSION,
            login: login.clone(),
        };
        self.storage
            .set(PENDING_LOGIN_KEY, &serde_json::to_string(&record)?)
    }

    /// Consumes the pending login whose state equals `state`.
    ///
    /// A state that does not match leaves the stored record untouched.
    /// A matching record is removed in the same storage step that checks
    /// it, so concurrent callbacks with one state succeed at most once.  A
    /// record older than `ttl` is removed and rejected.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidState`] when nothing matching is stored.
    pub fn take(&self, state: &str, ttl: Duration) -> Result<PendingLogin> {
        let matches = |raw: &str| match parse_record(raw) {
            Some(record) => constant_time_eq(record.login.state.as_bytes(), state.as_bytes()),
            // Unreadable records are dropped.
            None => true,
        };

        let Some(raw) = self.storage.take_if(PENDING_LOGIN_KEY, &matches)? else {
            tracing::warn!("Callback state does not match any pending login");
            return Err(AuthError::InvalidState);
        };

        let Some(record) = parse_record(&raw) else {
            tracing::warn!("Discarded unreadable pending login record");
            return Err(AuthError::InvalidState);
        };

        if record.login.created_at + ttl < Utc::now() {
            tracing::warn!("Pending login expired before the callback arrived");
            return Err(AuthError::InvalidState);
        }

        Ok(record.login)
    }

    /// Whether the slot holds a record.
    pub fn is_occupied(&self) -> Result<bool> {
        Ok(self.storage.get(PENDING_LOGIN_KEY)?.is_some())
    }
}

fn parse_record(raw: &str) -> Option<PendingRecord> {
    serde_json::from_str::<PendingRecord>(raw)
        .ok()
        .filter(|record| record.version == PENDING_RECORD_VERSION)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
