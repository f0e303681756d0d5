//! Byte codecs for [`Frame`](crate::Frame)s.
//!
//! The framed socket in `tether-network` only needs
//! bytes in and bytes out; whatever sits behind [`Codec`] decides the wire
//! format. [`JsonCodec`] is the only one shipped.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Turns serde values into bytes and back.
///
/// Codecs are stateless and shared by a connection's reader and writer
/// tasks, hence `Send + Sync + 'static`.
pub trait Codec: Send + Sync + 'static {
    /// # Errors
    /// [`ProtocolError::Encode`] if `value` has no representation in this
    /// format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// # Errors
    /// [`ProtocolError::Decode`] for truncated or foreign input.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// JSON over `serde_json`. Frames stay readable in logs and browser tools.
///
/// ```rust
/// use tether_protocol::{Codec, Frame, JsonCodec, RequestToken};
///
/// let codec = JsonCodec;
/// let frame = Frame::Response {
///     id: RequestToken::from("abc"),
///     message: "ok".into(),
/// };
///
/// let bytes = codec.encode(&frame).unwrap();
/// let decoded: Frame = codec.decode(&bytes).unwrap();
/// assert_eq!(frame, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
