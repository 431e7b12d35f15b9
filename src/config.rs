//! Configuration management for furlist-auth
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// OAuth client settings
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// Session lifecycle settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Persistent storage settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// OAuth client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Registered client id.  When unset and the redirect URI is a loopback
    /// URI, a loopback client id is derived (see [`OAuthConfig::client_id`]).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Pre-registered callback the authorization server redirects to
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Space-separated scopes requested at login
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Issuer used when the user leaves the host field empty
    #[serde(default = "default_issuer")]
    pub default_issuer: String,

    /// Accept `http://localhost` and `http://127.0.0.1` hosts (local PDS development)
    #[serde(default)]
    pub allow_loopback_http: bool,

    /// Seconds after which an unconsumed pending login is considered stale
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_seconds: u64,
}

fn default_redirect_uri() -> String {
    "http://127.0.0.1:8976/oauth/callback".to_string()
}

fn default_scope() -> String {
    "atproto transition:generic".to_string()
}

fn default_issuer() -> String {
    "https://bsky.social".to_string()
}

/// Upper bound for `oauth.pending_ttl_seconds` (one day)
pub const MAX_PENDING_TTL: u64 = 86_400;

/// Upper bound for `session.refresh_skew_seconds` (one hour)
pub const MAX_REFRESH_SKEW: i64 = 3_600;

fn default_pending_ttl() -> u64 {
    600
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            redirect_uri: default_redirect_uri(),
            scope: default_scope(),
            default_issuer: default_issuer(),
            allow_loopback_http: false,
            pending_ttl_seconds: default_pending_ttl(),
        }
    }
}

impl OAuthConfig {
    /// Parsed redirect URI
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configured value is not a URL.
    pub fn redirect_url(&self) -> Result<Url> {
        Url::parse(&self.redirect_uri)
            .map_err(|e| AuthError::Config(format!("Invalid redirect_uri: {e}")))
    }

    /// Parsed default issuer origin
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configured value is not a URL.
    pub fn default_issuer_url(&self) -> Result<Url> {
        Url::parse(&self.default_issuer)
            .map_err(|e| AuthError::Config(format!("Invalid default_issuer: {e}")))
    }

    /// The client id presented to the authorization server.
    ///
    /// Uses the configured value when present.  Otherwise, for loopback
    /// redirect URIs, builds the AT Protocol loopback client id
    /// `http://localhost?redirect_uri=<uri>&scope=<scope>`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] when no client id is configured and the
    /// redirect URI is not a loopback URI.
    pub fn client_id(&self) -> Result<String> {
        if let Some(id) = &self.client_id {
            return Ok(id.clone());
        }

        let redirect = self.redirect_url()?;
        if !is_loopback(&redirect) {
            return Err(AuthError::Config(
                "client_id is required for non-loopback redirect URIs".to_string(),
            ));
        }

        // Loopback client ids have no path, so the query is appended by hand.
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("redirect_uri", redirect.as_str())
            .append_pair("scope", &self.scope)
            .finish();
        Ok(format!("http://localhost?{query}"))
    }
}

/// Returns `true` for `http://localhost`, `http://127.0.0.1`, and `http://[::1]` URLs.
pub fn is_loopback(url: &Url) -> bool {
    url.scheme() == "http"
        && matches!(
            url.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]")
        )
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Refresh access tokens this many seconds before they expire
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_seconds: i64,
}

fn default_refresh_skew() -> i64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_skew_seconds: default_refresh_skew(),
        }
    }
}

/// Which storage backend holds the durable session record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON files under the data directory
    #[default]
    File,
    /// OS native credential store
    Keyring,
    /// Process memory only (nothing survives a restart)
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            other => Err(AuthError::Config(format!(
                "Invalid storage backend: {other}. Must be one of: file, keyring, memory"
            ))),
        }
    }
}

/// Persistent storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Backend used for the durable session and host preference
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory for file storage; defaults to the platform data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("Failed to read config file: {e}")))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| AuthError::Config(format!("Failed to parse config: {e}")))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(client_id) = std::env::var("FURLIST_CLIENT_ID") {
            self.oauth.client_id = Some(client_id);
        }

        if let Ok(redirect_uri) = std::env::var("FURLIST_REDIRECT_URI") {
            self.oauth.redirect_uri = redirect_uri;
        }

        if let Ok(scope) = std::env::var("FURLIST_SCOPE") {
            self.oauth.scope = scope;
        }

        if let Ok(issuer) = std::env::var("FURLIST_DEFAULT_ISSUER") {
            self.oauth.default_issuer = issuer;
        }

        if let Ok(allow) = std::env::var("FURLIST_ALLOW_LOOPBACK_HTTP") {
            match allow.parse() {
                Ok(value) => self.oauth.allow_loopback_http = value,
                Err(_) => tracing::warn!("Invalid FURLIST_ALLOW_LOOPBACK_HTTP: {}", allow),
            }
        }

        if let Ok(skew) = std::env::var("FURLIST_REFRESH_SKEW_SECONDS") {
            match skew.parse() {
                Ok(value) => self.session.refresh_skew_seconds = value,
                Err(_) => tracing::warn!("Invalid FURLIST_REFRESH_SKEW_SECONDS: {}", skew),
            }
        }

        if let Ok(backend) = std::env::var("FURLIST_STORAGE_BACKEND") {
            match backend.parse() {
                Ok(value) => self.storage.backend = value,
                Err(e) => tracing::warn!("{}", e),
            }
        }

        if let Ok(path) = std::env::var("FURLIST_STORAGE_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }

        if let Ok(timeout) = std::env::var("FURLIST_HTTP_TIMEOUT_SECONDS") {
            match timeout.parse() {
                Ok(value) => self.http.timeout_seconds = value,
                Err(_) => tracing::warn!("Invalid FURLIST_HTTP_TIMEOUT_SECONDS: {}", timeout),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(path.clone());
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let redirect = self.oauth.redirect_url()?;
        if redirect.scheme() != "https" && !is_loopback(&redirect) {
            return Err(AuthError::Config(
                "redirect_uri must be https or a loopback http URI".to_string(),
            ));
        }

        let issuer = self.oauth.default_issuer_url()?;
        if issuer.scheme() != "https" {
            return Err(AuthError::Config(
                "default_issuer must be an https URL".to_string(),
            ));
        }

        if !self.oauth.scope.split_whitespace().any(|s| s == "atproto") {
            return Err(AuthError::Config(
                "scope must include 'atproto'".to_string(),
            ));
        }

        if self.oauth.pending_ttl_seconds == 0 || self.oauth.pending_ttl_seconds > MAX_PENDING_TTL {
            return Err(AuthError::Config(format!(
                "pending_ttl_seconds must be between 1 and {MAX_PENDING_TTL}"
            )));
        }

        if !(0..=MAX_REFRESH_SKEW).contains(&self.session.refresh_skew_seconds) {
            return Err(AuthError::Config(format!(
                "refresh_skew_seconds must be between 0 and {MAX_REFRESH_SKEW}"
            )));
        }

        if self.http.timeout_seconds == 0 {
            return Err(AuthError::Config(
                "http.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        // Surfaces a missing client id for non-loopback redirects.
        self.oauth.client_id()?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oauth: OAuthConfig::default(),
            session: SessionConfig::default(),
            storage: StorageConfig::default(),
            http: HttpConfig::default(),
        }
    }
}
