//! Sending the user agent to the authorization server

use std::sync::{Arc, Mutex};

use url::Url;

use crate::error::{AuthError, Result};

/// Whatever navigates the user to a URL: a browser tab, the system browser,
/// or a recorder in tests.
pub trait UserAgent: Send + Sync {
    /// Navigates to `url`.
    fn redirect(&self, url: &Url) -> Result<()>;
}

/// Opens URLs in the desktop browser and echoes them to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl UserAgent for SystemBrowser {
    fn redirect(&self, url: &Url) -> Result<()> {
        eprintln!("Open this URL in your browser to log in:\n\n  {url}\n");
        try_open_browser(url.as_str());
        Ok(())
    }
}

/// Attempts to open `url` with the platform opener.  Failures are ignored;
/// the URL has already been printed.
fn try_open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open").arg(url).spawn();
    }
    #[cfg(target_os = "windows")]
    {
        let _ = std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .spawn();
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        let _ = url;
    }
}

/// A [`UserAgent`] that remembers every redirect instead of performing it.
#[derive(Debug, Clone, Default)]
pub struct RecordingUserAgent {
    visits: Arc<Mutex<Vec<Url>>>,
}

impl RecordingUserAgent {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All URLs redirected to, oldest first.
    pub fn visits(&self) -> Vec<Url> {
        self.visits
            .lock()
            .map(|visits| visits.clone())
            .unwrap_or_default()
    }

    /// The most recent redirect.
    pub fn last(&self) -> Option<Url> {
        self.visits().pop()
    }
}

impl UserAgent for RecordingUserAgent {
    fn redirect(&self, url: &Url) -> Result<()> {
        self.visits
            .lock()
            .map_err(|_| AuthError::Storage("redirect recorder lock poisoned".to_string()))?
            .push(url.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_user_agent_keeps_order() {
        let agent = RecordingUserAgent::new();
        assert!(agent.last().is_none());

        agent.redirect(&Url::parse("https://a.example/").unwrap()).unwrap();
        agent.redirect(&Url::parse("https://b.example/").unwrap()).unwrap();

        let visits = agent.visits();
        assert_eq!(visits.len(), 2);
        assert_eq!(visits[0].as_str(), "https://a.example/");
        assert_eq!(agent.last().unwrap().as_str(), "https://b.example/");
    }

    #[test]
    fn test_recording_user_agent_clones_share_history() {
        let agent = RecordingUserAgent::new();
        let observer = agent.clone();
        agent.redirect(&Url::parse("https://a.example/").unwrap()).unwrap();
        assert_eq!(observer.visits().len(), 1);
    }
}
