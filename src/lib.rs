//! furlist-auth - atproto PDS login and session lifecycle
//!
//! This library resolves a user-supplied Personal Data Server host, drives
//! the OAuth redirect login against the issuer protecting it, and owns the
//! resulting session: persistence, refresh, logout, and the hydration gate
//! that keeps session-dependent UI hidden until the first load completes.
//!
//! # Architecture
//!
//! - `auth`: host resolution, issuer discovery, login initiation, callback
//!   handling, and the token endpoint
//! - `session`: the session record, the single-writer session store, and the
//!   hydration gate
//! - `client`: the façade every other component goes through
//! - `storage`: durable and tab-scoped key/value backends
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use furlist_auth::{Client, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml", &Default::default())?;
//!     let client = Client::builder(config).build()?;
//!
//!     client.hydrate().await;
//!     if client.current().is_none() {
//!         client.login("my.pds.example").await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use client::{Client, ClientBuilder};
pub use config::Config;
pub use error::{AuthError, Result};
pub use session::{HydrationGate, HydrationState, Session, SessionStore};
