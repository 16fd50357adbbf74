//! PKCE (RFC 7636) verifier and S256 challenge generation.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Number of random bytes behind a verifier (43 base64url chars).
const VERIFIER_BYTES: usize = 32;

/// Generate a cryptographically random code verifier.
///
/// 32 bytes from the thread-local CSPRNG, base64url-encoded without padding.
#[must_use]
pub fn generate_verifier() -> String {
    let verifier_bytes: [u8; VERIFIER_BYTES] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(verifier_bytes)
}

/// Derive the S256 code challenge: `BASE64URL(SHA256(ascii(verifier)))`.
#[must_use]
pub fn derive_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge_bytes = hasher.finalize();
    URL_SAFE_NO_PAD.encode(challenge_bytes)
}
