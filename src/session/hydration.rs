//! Hydration gate
//!
//! Until the session store's first load from durable storage completes,
//! nothing that depends on "logged in or not" may render.  The gate moves
//! from [`HydrationState::NotHydrated`] to [`HydrationState::Hydrated`]
//! exactly once and never back.

use std::sync::Arc;

use tokio::sync::watch;

/// The two states of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationState {
    /// Durable storage has not been read yet
    NotHydrated,
    /// The initial load finished (with or without a session)
    Hydrated,
}

/// One-way latch shared by the session store and its consumers.
#[derive(Debug, Clone)]
pub struct HydrationGate {
    tx: Arc<watch::Sender<HydrationState>>,
}

impl Default for HydrationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl HydrationGate {
    /// Creates a gate in the `NotHydrated` state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(HydrationState::NotHydrated);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn state(&self) -> HydrationState {
        *self.tx.borrow()
    }

    /// Whether the initial load has completed.
    pub fn is_hydrated(&self) -> bool {
        self.state() == HydrationState::Hydrated
    }

    /// Flips the gate.  Returns `true` only for the call that performed the
    /// transition.
    pub fn mark_hydrated(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == HydrationState::Hydrated {
                false
            } else {
                *state = HydrationState::Hydrated;
                true
            }
        })
    }

    /// Waits until the gate is hydrated.  Returns immediately if it already is.
    pub async fn wait_hydrated(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| *state == HydrationState::Hydrated).await;
    }

    /// Runs `render` only once hydrated; returns `None` before that.
    ///
    /// ```
    /// use furlist_auth::session::hydration::HydrationGate;
    ///
    /// let gate = HydrationGate::new();
    /// assert_eq!(gate.render(|| "menu"), None);
    /// gate.mark_hydrated();
    /// assert_eq!(gate.render(|| "menu"), Some("menu"));
    /// ```
    pub fn render<T>(&self, render: impl FnOnce() -> T) -> Option<T> {
        self.is_hydrated().then(render)
    }
}
