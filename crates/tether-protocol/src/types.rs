//! Reserved keys and the wire frame.

use serde::{Deserialize, Serialize};

use crate::RequestToken;

// ---------------------------------------------------------------------------
// Reserved keys
// ---------------------------------------------------------------------------

/// Session layer: "give me an identity" (or "tell me the one I have").
pub const REGISTER_KEY: &str = "register";

/// Session layer: "I am this identity, resume my session here".
pub const LOGIN_KEY: &str = "login";

/// Sync layer: authoritative state push, acknowledged with an empty reply.
pub const SYNC_UPDATE_KEY: &str = "syncUpdate";

/// Sync layer: state push followed by a reply computed from that state.
pub const SYNC_REQUEST_KEY: &str = "syncRequest";

/// Returns `true` for keys owned by the session or sync layers.
///
/// Application code must never send these as its own keys.
pub fn is_reserved(key: &str) -> bool {
    matches!(
        key,
        REGISTER_KEY | LOGIN_KEY | SYNC_UPDATE_KEY | SYNC_REQUEST_KEY
    )
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One unit of traffic on a raw connection.
///
/// `#[serde(tag = "type")]` produces internally tagged JSON:
///
/// ```text
/// { "type": "Request",  "id": "9f…", "key": "register", "message": "" }
/// { "type": "Response", "id": "9f…", "message": "4ab0…" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Either direction: "please answer this".
    Request {
        id: RequestToken,
        key: String,
        message: String,
    },

    /// The answer to the request carrying the same `id`.
    Response { id: RequestToken, message: String },
}

impl Frame {
    /// The correlation id carried by either variant.
    pub fn id(&self) -> &RequestToken {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_reserved_covers_control_keys() {
        assert!(is_reserved("register"));
        assert!(is_reserved("login"));
        assert!(is_reserved("syncUpdate"));
        assert!(is_reserved("syncRequest"));
        assert!(!is_reserved("move"));
        assert!(!is_reserved("Register"));
    }

    #[test]
    fn test_frame_request_json_format() {
        let frame = Frame::Request {
            id: RequestToken::from("t1"),
            key: "move".into(),
            message: "{x:0,y:0}".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "Request");
        assert_eq!(json["id"], "t1");
        assert_eq!(json["key"], "move");
        assert_eq!(json["message"], "{x:0,y:0}");
    }

    #[test]
    fn test_frame_response_json_format() {
        let frame = Frame::Response {
            id: RequestToken::from("t1"),
            message: String::new(),
        };
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "Response");
        assert_eq!(json["message"], "");
        assert!(json.get("key").is_none());
    }

    #[test]
    fn test_frame_unknown_type_fails_to_decode() {
        let unknown = r#"{"type": "Ping", "id": "x"}"#;
        let result: Result<Frame, _> = serde_json::from_str(unknown);
        assert!(result.is_err());
    }

    #[test]
    fn test_frame_id_returns_token_for_both_variants() {
        let req = Frame::Request {
            id: RequestToken::from("a"),
            key: String::new(),
            message: String::new(),
        };
        let resp = Frame::Response {
            id: RequestToken::from("b"),
            message: String::new(),
        };
        assert_eq!(req.id().as_str(), "a");
        assert_eq!(resp.id().as_str(), "b");
    }
}
