//! The session store
//!
//! A single process-wide owner of the [`Session`].  Every mutation
//! (`install`, `clear`, and the replace inside `refresh`) runs under one
//! async mutex and bumps a version counter; a refresh that finishes after a
//! newer mutation notices the version change and discards its result instead
//! of writing over it.
//!
//! Observers subscribe through a `watch` channel and are notified after the
//! durable write completes.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use super::{HydrationGate, Session};
use crate::auth::token::TokenClient;
use crate::error::{AuthError, Result};
use crate::storage::{Storage, SESSION_KEY};

/// Shape version of the persisted record.  Bump when [`Session`] changes
/// incompatibly; records with another version are ignored on load.
pub const SESSION_RECORD_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    version: u32,
    session: Session,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Incremented by every install/clear/refresh.  Zero means untouched
    /// since startup.
    version: u64,
}

/// Owner of the current session.
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    state: Mutex<StoreState>,
    refresh_lock: Mutex<()>,
    tx: watch::Sender<Option<Session>>,
    hydration: HydrationGate,
    refresh_skew: Duration,
}

impl SessionStore {
    /// Creates an empty, not-yet-hydrated store over durable `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            storage,
            state: Mutex::new(StoreState::default()),
            refresh_lock: Mutex::new(()),
            tx,
            hydration: HydrationGate::new(),
            refresh_skew: Duration::seconds(60),
        }
    }

    /// Sets how close to expiry a token may get before `refresh` renews it.
    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    /// The gate this store flips when its initial load completes.
    pub fn hydration(&self) -> &HydrationGate {
        &self.hydration
    }

    /// Loads the persisted session once and marks the store hydrated.
    ///
    /// A missing, unreadable, corrupt, or wrong-version record all count as
    /// "no session".  If a session was installed or cleared before this
    /// runs, the in-memory state wins and storage is not consulted.
    /// Calling this again after hydration just returns the current session.
    pub async fn hydrate(&self) -> Option<Session> {
        let state = self.state.lock().await;

        if self.hydration.is_hydrated() {
            return self.current();
        }

        if state.version == 0 {
            if let Some(session) = self.load_persisted() {
                tracing::info!("Restored session for {}", session.handle);
                self.tx.send_replace(Some(session));
            }
        }

        drop(state);
        self.hydration.mark_hydrated();
        self.current()
    }

    fn load_persisted(&self) -> Option<Session> {
        let raw = match self.storage.get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read persisted session: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<StoredSession>(&raw) {
            Ok(record) if record.version == SESSION_RECORD_VERSION => Some(record.session),
            Ok(record) => {
                tracing::warn!(
                    "Ignoring persisted session with record version {}",
                    record.version
                );
                None
            }
            Err(e) => {
                tracing::warn!("Ignoring corrupt persisted session: {}", e);
                None
            }
        }
    }

    /// The active session, if any.  Callable before hydration, but only
    /// meaningful after it.
    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    /// Subscribes to session changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }

    /// Replaces the session, persisting first.
    ///
    /// # Errors
    ///
    /// If the durable write fails nothing changes and the error is returned.
    pub async fn install(&self, session: Session) -> Result<()> {
        let mut state = self.state.lock().await;
        self.persist(&session)?;
        state.version += 1;
        tracing::info!("Session installed for {} ({})", session.handle, session.did);
        self.tx.send_replace(Some(session));
        Ok(())
    }

    /// Removes the session from memory and durable storage.
    ///
    /// Idempotent.  Returns `true` if a session was actually removed;
    /// observers are only notified in that case.
    pub async fn clear(&self) -> bool {
        let mut state = self.state.lock().await;
        self.clear_locked(&mut state)
    }

    fn clear_locked(&self, state: &mut StoreState) -> bool {
        if let Err(e) = self.storage.remove(SESSION_KEY) {
            tracing::warn!("Failed to remove persisted session: {}", e);
        }
        state.version += 1;

        let had_session = self.tx.borrow().is_some();
        if had_session {
            self.tx.send_replace(None);
            tracing::info!("Session cleared");
        }
        had_session
    }

    /// Renews the access token if it is expired or about to expire.
    ///
    /// Returns the session as it stands afterwards (`None` when logged out).
    /// Refreshes are serialized, so a single-use refresh token is never
    /// presented twice.  If a logout or a new login lands while the refresh
    /// is in flight, the refresh result is dropped and the newer state is
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`AuthError::SessionExpired`] when the refresh token is rejected,
    ///   or the token expired without one.  The session has been cleared.
    /// - [`AuthError::TokenExchangeFailed`] for transient failures; the
    ///   session is kept.
    pub async fn refresh(&self, tokens: &TokenClient) -> Result<Option<Session>> {
        let _refreshing = self.refresh_lock.lock().await;

        let (session, version) = {
            let state = self.state.lock().await;
            (self.current(), state.version)
        };

        let Some(session) = session else {
            return Ok(None);
        };

        if !session.needs_refresh(self.refresh_skew) {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            if !session.is_expired() {
                return Ok(Some(session));
            }
            tracing::info!("Access token expired and no refresh token is available");
            return self.expire_if_current(version).await;
        };

        tracing::debug!("Access token for {} is due for refresh", session.handle);

        match tokens.refresh(&session.token_endpoint, &refresh_token).await {
            Ok(fresh) => {
                let mut state = self.state.lock().await;
                if state.version != version {
                    tracing::debug!("Session changed during refresh; discarding result");
                    return Ok(self.current());
                }

                let updated = session.with_refreshed(fresh);
                self.persist(&updated)?;
                state.version += 1;
                self.tx.send_replace(Some(updated.clone()));
                tracing::debug!("Access token refreshed for {}", updated.handle);
                Ok(Some(updated))
            }
            Err(AuthError::SessionExpired) => self.expire_if_current(version).await,
            Err(e) => Err(e),
        }
    }

    /// Clears the session if nothing replaced it since `version`, then
    /// reports [`AuthError::SessionExpired`].
    async fn expire_if_current(&self, version: u64) -> Result<Option<Session>> {
        let mut state = self.state.lock().await;
        if state.version != version {
            return Ok(self.current());
        }
        self.clear_locked(&mut state);
        Err(AuthError::SessionExpired)
    }

    fn persist(&self, session: &Session) -> Result<()> {
        let record = StoredSession {
            version: SESSION_RECORD_VERSION,
            session: session.clone(),
        };
        let json = serde_json::to_string(&record)?;
        self.storage.set(SESSION_KEY, &json)
    }
}
