//! Identifier generation: identities and request tokens.
//!
//! Both kinds of identifier come from the same generator: 16 random bytes
//! rendered as 32 lowercase hex characters. 128 bits is far beyond what is
//! needed to keep thousands of live sessions and requests collision-free,
//! and guessing a live token is infeasible.
//!
//! These are *unguessable identifiers*, not credentials. Nothing here
//! signs or verifies anything.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Generates a random 32-character hex string (128 bits of entropy).
///
/// Stateless and non-blocking; uses the thread-local RNG, so it can be
/// called from any task without coordination.
pub fn generate_uid() -> String {
    let mut rng = rand::rng();
    // `{:02x}` is lowercase hex, zero-padded to 2 digits: 0x0A → "0a".
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Opaque token identifying a reconnectable client session.
///
/// Minted by the server when a client registers and handed back to the
/// client, which presents it again (via `login`) after a transport drop.
///
/// `#[serde(transparent)]` serializes this as the bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Mints a fresh, unguessable identity.
    pub fn generate() -> Self {
        Self(generate_uid())
    }

    /// Borrows the identity as a string slice (its wire form).
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RequestToken
// ---------------------------------------------------------------------------

/// Correlates a request with its response.
///
/// Carried in-band in every request and response frame. Tokens survive a
/// reconnect: a replayed request reuses the token it was first sent with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(String);

impl RequestToken {
    /// Generates a fresh token.
    pub fn generate() -> Self {
        Self(generate_uid())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_generate_uid_is_32_lowercase_hex_chars() {
        let uid = generate_uid();
        assert_eq!(uid.len(), 32);
        assert!(
            uid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()),
            "unexpected characters in {uid}"
        );
    }

    #[test]
    fn test_generate_uid_hundred_thousand_no_collisions() {
        let ids: HashSet<String> = (0..100_000).map(|_| generate_uid()).collect();
        assert_eq!(ids.len(), 100_000);
    }

    #[test]
    fn test_identity_serializes_as_plain_string() {
        let id = Identity::from("abc123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc123\"");
    }

    #[test]
    fn test_identity_display_is_raw_token() {
        assert_eq!(Identity::from("abc123").to_string(), "abc123");
    }

    #[test]
    fn test_request_token_generate_unique() {
        assert_ne!(RequestToken::generate(), RequestToken::generate());
    }
}
