use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// A PKCE verifier and its S256 challenge.
#[derive(Clone)]
pub struct Pkce {
    /// The secret kept by the client and sent during the code exchange.
    pub code_verifier: String,
    /// The hashed verifier sent in the authorization request.
    pub code_challenge: String,
}

impl Pkce {
    /// The only challenge method this crate produces.
    pub const METHOD: &'static str = "S256";

    /// Generate a fresh verifier/challenge pair.
    pub fn new() -> Self {
        let code_verifier = random_token();
        let code_challenge = challenge_for(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
        }
    }
}

impl Default for Pkce {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pkce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkce")
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .finish()
    }
}

/// Compute the S256 challenge for a verifier.
pub fn challenge_for(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

/// 32 random bytes, base64url encoded without padding.
///
/// Used for PKCE verifiers, CSRF state values and opaque tokens.
pub fn random_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}
