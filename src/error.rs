//! Error types for furlist-auth
//!
//! Every failure the login and session lifecycle can surface is a variant of
//! [`AuthError`].  The first group mirrors the user-facing taxonomy rendered
//! by the login form; the second group wraps infrastructure failures.

use thiserror::Error;

/// Main error type for login, callback, and session operations
#[derive(Error, Debug)]
pub enum AuthError {
    /// The host typed by the user is not a usable https origin
    #[error("Invalid host '{input}': {reason}")]
    InvalidHost {
        /// The raw input as typed
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// The issuer metadata could not be fetched or parsed
    #[error("Discovery failed for {origin}: {reason}")]
    DiscoveryFailed {
        /// The canonical origin discovery ran against
        origin: String,
        /// Underlying network or parse failure
        reason: String,
    },

    /// The issuer metadata lacks something this client requires
    #[error("Unsupported issuer {origin}: {reason}")]
    UnsupportedIssuer {
        /// The canonical origin discovery ran against
        origin: String,
        /// The missing or unsupported capability
        reason: String,
    },

    /// A login is already in flight in this tab
    #[error("A login is already pending")]
    LoginAlreadyPending,

    /// The callback `state` does not match an unconsumed pending login
    #[error("Invalid or already-consumed login state")]
    InvalidState,

    /// The token endpoint refused or failed the exchange
    #[error("Token exchange failed: {reason}")]
    TokenExchangeFailed {
        /// Status, OAuth error code, or transport failure
        reason: String,
    },

    /// The authorization server redirected back with an error
    #[error("Authorization denied: {error}")]
    AuthorizationDenied {
        /// Issuer-supplied OAuth error code (e.g. `access_denied`)
        error: String,
        /// Optional human-readable description from the issuer
        description: Option<String>,
    },

    /// The refresh token was rejected; the session has been cleared
    #[error("Session expired; please log in again")]
    SessionExpired,

    /// An authenticated call was attempted without a session
    #[error("Not logged in")]
    NotAuthenticated,

    /// The tab navigated away while the operation was in flight
    #[error("Operation cancelled by navigation")]
    Cancelled,

    /// An authenticated API call returned a non-success status
    #[error("API error {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body, as text
        body: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl AuthError {
    /// Returns `true` for errors the login form renders next to the host
    /// field (as opposed to infrastructure failures).
    pub fn is_login_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidHost { .. }
                | Self::DiscoveryFailed { .. }
                | Self::UnsupportedIssuer { .. }
                | Self::LoginAlreadyPending
        )
    }
}

/// Result type alias for furlist-auth operations
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_host_display() {
        let error = AuthError::InvalidHost {
            input: "ftp://nope".to_string(),
            reason: "scheme must be https".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid host 'ftp://nope': scheme must be https"
        );
    }

    #[test]
    fn test_discovery_failed_carries_origin() {
        let error = AuthError::DiscoveryFailed {
            origin: "https://pds.example".to_string(),
            reason: "connection refused".to_string(),
        };
        let s = error.to_string();
        assert!(s.contains("https://pds.example"));
        assert!(s.contains("connection refused"));
    }

    #[test]
    fn test_authorization_denied_display() {
        let error = AuthError::AuthorizationDenied {
            error: "access_denied".to_string(),
            description: Some("user declined".to_string()),
        };
        assert_eq!(error.to_string(), "Authorization denied: access_denied");
    }

    #[test]
    fn test_is_login_error() {
        assert!(AuthError::LoginAlreadyPending.is_login_error());
        assert!(AuthError::UnsupportedIssuer {
            origin: "https://a".to_string(),
            reason: "b".to_string()
        }
        .is_login_error());
        assert!(!AuthError::SessionExpired.is_login_error());
        assert!(!AuthError::InvalidState.is_login_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: AuthError = io_error.into();
        assert!(matches!(error, AuthError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: AuthError = json_error.into();
        assert!(matches!(error, AuthError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: AuthError = yaml_error.into();
        assert!(matches!(error, AuthError::Yaml(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuthError>();
    }
}
