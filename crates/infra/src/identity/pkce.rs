//! PKCE (Proof Key for Code Exchange, RFC 7636) for the authorization-code
//! flow of a public client.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// 32 random bytes, base64url encoded (43 characters).
fn random_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `BASE64URL(SHA256(ASCII(code_verifier)))`
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Verifier, challenge and CSRF state for one authorization request.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Kept secret until the code is redeemed.
    pub code_verifier: String,
    pub code_challenge: String,
    /// Must come back unchanged on the redirect.
    pub state: String,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let code_verifier = random_token();
        let code_challenge = code_challenge(&code_verifier);
        Self { code_verifier, code_challenge, state: random_token() }
    }

    #[must_use]
    pub fn challenge_method(&self) -> &'static str {
        "S256"
    }
}
