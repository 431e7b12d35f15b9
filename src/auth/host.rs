//! Host resolution: user-typed PDS host to canonical origin
//!
//! The login form accepts an empty field, a bare hostname, or a full URL.
//! [`HostResolver::resolve`] normalizes all three into an https origin
//! (scheme, host, and port only).

use url::Url;

use crate::config::{is_loopback, OAuthConfig};
use crate::error::{AuthError, Result};

/// A canonical origin produced by [`HostResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    url: Url,
    custom: bool,
}

impl ResolvedHost {
    /// The origin as a URL with an empty (`/`) path.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The origin serialized without a trailing slash, e.g. `https://pds.example`.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// `false` when the input was empty and the default issuer was used.
    pub fn is_custom(&self) -> bool {
        self.custom
    }
}

/// Normalizes and validates user-entered hosts.
#[derive(Debug, Clone)]
pub struct HostResolver {
    default_issuer: Url,
    allow_loopback_http: bool,
}

impl HostResolver {
    /// Creates a resolver that maps empty input to `default_issuer`.
    pub fn new(default_issuer: Url) -> Self {
        Self {
            default_issuer: canonical(&default_issuer),
            allow_loopback_http: false,
        }
    }

    /// Builds a resolver from the OAuth configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the default issuer is not a URL.
    pub fn from_config(config: &OAuthConfig) -> Result<Self> {
        Ok(Self::new(config.default_issuer_url()?).allow_loopback_http(config.allow_loopback_http))
    }

    /// Also accept `http://localhost` / `http://127.0.0.1` origins.
    pub fn allow_loopback_http(mut self, allow: bool) -> Self {
        self.allow_loopback_http = allow;
        self
    }

    /// Resolves raw input into a canonical origin.
    ///
    /// - empty (or whitespace) input resolves to the default issuer
    /// - input without a scheme gets `https://` prefixed
    /// - the result must be an https URL with a host
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidHost`] for anything that does not parse
    /// into an https origin.
    ///
    /// # Examples
    ///
    /// ```
    /// use furlist_auth::auth::host::HostResolver;
    ///
    /// let resolver = HostResolver::new("https://bsky.social".parse().unwrap());
    /// let host = resolver.resolve("my.pds.example/some/path").unwrap();
    /// assert_eq!(host.origin(), "https://my.pds.example");
    /// assert!(resolver.resolve("").unwrap().origin() == "https://bsky.social");
    /// ```
    pub fn resolve(&self, input: &str) -> Result<ResolvedHost> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(ResolvedHost {
                url: self.default_issuer.clone(),
                custom: false,
            });
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        let invalid = |reason: String| AuthError::InvalidHost {
            input: input.to_string(),
            reason,
        };

        let url = Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;

        let scheme_ok = url.scheme() == "https" || (self.allow_loopback_http && is_loopback(&url));
        if !scheme_ok {
            return Err(invalid(format!(
                "scheme must be https, got '{}'",
                url.scheme()
            )));
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        if !url.username().is_empty() || url.password().is_some() {
            return Err(invalid("credentials are not allowed in the host".to_string()));
        }

        Ok(ResolvedHost {
            url: canonical(&url),
            custom: true,
        })
    }
}

/// Strips path, query, fragment, and credentials.
fn canonical(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    let _ = origin.set_username("");
    let _ = origin.set_password(None);
    origin
}
