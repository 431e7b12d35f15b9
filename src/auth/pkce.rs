//! PKCE `S256` pairs and OAuth `state` tokens
//!
//! 1. A high-entropy random `code_verifier` is generated per login attempt.
//! 2. `code_challenge = BASE64URL(SHA256(code_verifier))` goes into the
//!    authorization request with `code_challenge_method=S256`.
//! 3. The verifier itself is only sent to the token endpoint, proving the
//!    code is redeemed by whoever started the login.
//!
//! See RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore as _;
use sha2::{Digest, Sha256};

/// A PKCE verifier and its derived `S256` challenge.
#[derive(Clone)]
pub struct PkceChallenge {
    /// 32 random bytes, base64url without padding (43 characters).
    pub verifier: String,

    /// `BASE64URL(SHA256(verifier))`.
    pub challenge: String,
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkceChallenge {
    /// The challenge method sent alongside [`Self::challenge`].
    pub const METHOD: &'static str = "S256";
}

/// Generates a fresh PKCE pair.
///
/// # Examples
///
/// ```
/// use furlist_auth::auth::pkce::{challenge_for, generate};
///
/// let pkce = generate();
/// assert_eq!(pkce.verifier.len(), 43);
/// assert_eq!(challenge_for(&pkce.verifier), pkce.challenge);
/// ```
pub fn generate() -> PkceChallenge {
    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);
    let verifier = URL_SAFE_NO_PAD.encode(random_bytes);
    let challenge = challenge_for(&verifier);

    PkceChallenge {
        verifier,
        challenge,
    }
}

/// Computes the `S256` challenge for a verifier.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generates an unguessable `state` token: 32 random bytes, base64url.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
