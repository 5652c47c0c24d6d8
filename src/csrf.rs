//! Anti-CSRF token issuance and comparison.
//!
//! Tokens are bound to a flow at creation and must be echoed back on every
//! non-API submission. They are rotated whenever an error re-renders the
//! form.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Form field and node name carrying the token.
pub const TOKEN_NAME: &str = "csrf_token";

const TOKEN_BYTES: usize = 32;

/// Issue a fresh random token.
#[must_use]
pub fn new_token() -> String {
    let mut raw = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

/// Constant-time token comparison.
#[must_use]
pub fn tokens_match(issued: &str, submitted: &str) -> bool {
    let issued = issued.as_bytes();
    let submitted = submitted.as_bytes();
    if issued.len() != submitted.len() || issued.is_empty() {
        return false;
    }
    let mut diff = 0u8;
    for (lhs, rhs) in issued.iter().zip(submitted) {
        diff |= lhs ^ rhs;
    }
    diff == 0
}
