//! PKCE (Proof Key for Code Exchange)
//!
//! RFC 7636 with the S256 challenge method, which binds an authorization
//! code to a client-generated secret so an intercepted code cannot be
//! redeemed by anyone else.

use sha2::{Digest, Sha256};

/// Derive the S256 code challenge for a verifier
///
/// `BASE64URL(SHA256(ASCII(code_verifier)))`, unpadded.
pub fn code_challenge_s256(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    base64_url::encode(&hasher.finalize())
}

/// Verify a code_verifier against a stored S256 code_challenge
pub fn verify_pkce(code_verifier: &str, code_challenge: &str) -> bool {
    code_challenge_s256(code_verifier) == code_challenge
}

/// Validate code_verifier format per RFC 7636 Section 4.1
///
/// 43-128 characters from [A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~".
pub fn validate_code_verifier(code_verifier: &str) -> bool {
    let len = code_verifier.len();
    if !(43..=128).contains(&len) {
        return false;
    }
    code_verifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

/// Validate code_challenge format per RFC 7636 Section 4.2
///
/// Base64url alphabet, 43-128 characters (an S256 challenge is exactly 43).
pub fn validate_code_challenge(code_challenge: &str) -> bool {
    let len = code_challenge.len();
    if !(43..=128).contains(&len) {
        return false;
    }
    code_challenge
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}
