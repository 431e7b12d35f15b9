//! Login flow for atproto Personal Data Servers
//!
//! A login runs in two halves separated by a browser redirect:
//!
//! 1. [`login::LoginInitiator`] resolves the host ([`host`]), discovers the
//!    issuer ([`discovery`]), records a [`pending::PendingLogin`] with a
//!    fresh PKCE pair ([`pkce`]), and redirects the user agent ([`redirect`]).
//! 2. [`callback::TokenExchanger`] consumes the pending login, redeems the
//!    code ([`token`]), looks up the identity ([`identity`]), and installs
//!    the session.
//!
//! [`loopback`] lets a terminal receive the redirect on a local port.

pub mod callback;
pub mod discovery;
pub mod host;
pub mod identity;
pub mod login;
pub mod loopback;
pub mod pending;
pub mod pkce;
pub mod redirect;
pub mod token;

pub use callback::{CallbackParams, TokenExchanger};
pub use discovery::{HttpIssuerDiscovery, IssuerDiscovery, IssuerMetadata};
pub use host::{HostResolver, ResolvedHost};
pub use identity::{Identity, IdentityResolver, XrpcIdentityResolver};
pub use login::{AuthorizationRequest, LoginInitiator, LoginParams};
pub use pending::{PendingLogin, PendingLoginStore};
pub use redirect::{RecordingUserAgent, SystemBrowser, UserAgent};
pub use token::{TokenClient, TokenSet};
