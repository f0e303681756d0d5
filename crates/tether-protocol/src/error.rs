//! Error types for the protocol layer.

/// Errors that can occur in the protocol layer.
///
/// Nothing here ever reaches an application caller directly: the layers
/// above absorb decode failures as transport noise and only log them.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields, or a
    /// truncated frame.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The delimiter chosen for a [`DelimitedCodec`](crate::DelimitedCodec)
    /// collides with the escape character.
    #[error("invalid delimiter {0:?}: reserved as the escape character")]
    InvalidDelimiter(char),

    /// The message is invalid at the protocol level.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
