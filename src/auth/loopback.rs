//! Loopback redirect listener
//!
//! When the redirect URI points at `127.0.0.1`/`localhost`, the CLI listens
//! there for the issuer's redirect instead of asking the user to paste it.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use url::Url;

use crate::config::is_loopback;
use crate::error::{AuthError, Result};

const SUCCESS_RESPONSE: &str = concat!(
    "HTTP/1.1 200 OK\r\n",
    "Content-Type: text/plain; charset=utf-8\r\n",
    "Connection: close\r\n\r\n",
    "Login received. You may close this tab."
);
const NOT_FOUND_RESPONSE: &str = concat!(
    "HTTP/1.1 404 Not Found\r\n",
    "Content-Type: text/plain; charset=utf-8\r\n",
    "Connection: close\r\n\r\n",
    "Not found."
);

/// How long one connection may take to send its request head.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest accepted request or header line, in bytes.
const MAX_LINE_LEN: u64 = 8 * 1024;

/// Most header lines read before giving up on a request.
const MAX_HEADERS: usize = 100;

/// Binds a listener on the host and port of `redirect_uri`.
///
/// # Errors
///
/// [`AuthError::Config`] if `redirect_uri` is not a loopback URI, and
/// [`AuthError::Io`] if the port cannot be bound.
pub async fn bind(redirect_uri: &Url) -> Result<TcpListener> {
    if !is_loopback(redirect_uri) {
        return Err(AuthError::Config(format!(
            "redirect URI {redirect_uri} is not a loopback URI"
        )));
    }

    let port = redirect_uri.port_or_known_default().unwrap_or(80);
    let host = match redirect_uri.host_str() {
        Some("[::1]") => "[::1]",
        _ => "127.0.0.1",
    };

    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::debug!("Listening for the login redirect on {}:{}", host, port);
    Ok(listener)
}

/// Accepts connections until one requests the redirect path, answers it,
/// and returns the full redirect URL (with query) it was called with.
///
/// Requests for other paths (e.g. `/favicon.ico`) get a 404 and are skipped.
/// A connection that stalls, sends an oversized line, or fails mid-read is
/// dropped and the listener keeps waiting.
///
/// # Errors
///
/// [`AuthError::Io`] if the listener itself fails to accept.
pub async fn accept_callback(listener: &TcpListener, redirect_uri: &Url) -> Result<Url> {
    accept_callback_within(listener, redirect_uri, REQUEST_TIMEOUT).await
}

async fn accept_callback_within(
    listener: &TcpListener,
    redirect_uri: &Url,
    request_timeout: Duration,
) -> Result<Url> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!("Loopback connection from {}", peer);

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let target = match tokio::time::timeout(request_timeout, read_target(&mut reader)).await {
            Ok(Ok(target)) => target,
            Ok(Err(e)) => {
                tracing::debug!("Dropping loopback connection from {}: {}", peer, e);
                continue;
            }
            Err(_) => {
                tracing::debug!("Loopback connection from {} sent no request in time", peer);
                continue;
            }
        };

        let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
        if path != redirect_uri.path() {
            let _ = write_half.write_all(NOT_FOUND_RESPONSE.as_bytes()).await;
            continue;
        }

        let mut callback = redirect_uri.clone();
        callback.set_query((!query.is_empty()).then_some(query));
        let _ = write_half.write_all(SUCCESS_RESPONSE.as_bytes()).await;
        let _ = write_half.shutdown().await;
        return Ok(callback);
    }
}

/// Reads the request head and returns the request target.
async fn read_target<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let request_line = read_bounded_line(reader).await?;
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| bad_request("malformed request line"))?
        .to_string();

    for _ in 0..MAX_HEADERS {
        if read_bounded_line(reader).await?.trim_end().is_empty() {
            return Ok(target);
        }
    }
    Err(bad_request("too many header lines"))
}

async fn read_bounded_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    (&mut *reader).take(MAX_LINE_LEN).read_line(&mut line).await?;
    if !line.ends_with('\n') {
        return Err(bad_request("request line too long or truncated"));
    }
    Ok(line)
}

fn bad_request(reason: &str) -> AuthError {
    AuthError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, reason))
}
