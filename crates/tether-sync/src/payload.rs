//! What a sync message carries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The event a [`SyncResponder`](crate::SyncResponder) sees.
///
/// A `syncUpdate` carries only the state (its message *is* the state). A
/// `syncRequest` carries a JSON object with at least a `state` string;
/// every other field is passed through untouched in `fields`:
///
/// ```text
/// {"state": "<board>", "method": "get_move", "args": null}
///  └─ state ─────────┘ └─ fields ──────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub state: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SyncEvent {
    /// An event with no extra fields.
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            fields: Map::new(),
        }
    }

    /// An event with extra fields.
    pub fn with_fields(state: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            state: state.into(),
            fields,
        }
    }

    /// Looks up an extra field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
