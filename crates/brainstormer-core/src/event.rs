//! Wire events for the suggestion stream.
//!
//! Each event is sent as one server-sent-event frame, `data: <JSON>\n\n`,
//! with a `type` discriminator:
//!
//! | `type` | Fields |
//! |--------|--------|
//! | `status` | `message`, `session_id`, `is_load_more` |
//! | `suggestion` | `data: { word, match_type }` |
//! | `progress` | `count` |
//! | `complete` | `total`, `session_id`, `total_session_words` |
//! | `error` | `message` |
//!
//! An `error` event is terminal: no `complete` follows it.

use serde::{Deserialize, Serialize};

use crate::phrase::MatchMode;

/// One accepted word or phrase, as sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub word: String,
    pub match_type: MatchMode,
}

/// A single event on the suggestion stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Status {
        message: String,
        session_id: String,
        is_load_more: bool,
    },
    Suggestion {
        data: Suggestion,
    },
    Progress {
        count: usize,
    },
    Complete {
        total: usize,
        session_id: String,
        total_session_words: usize,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    /// Whether the client should stop reading after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }

    /// JSON payload of the event.
    pub fn to_json(&self) -> String {
        // Every field is a string, bool, or integer, so this cannot fail.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"type\":\"error\",\"message\":{}}}",
                serde_json::Value::String(e.to_string())
            )
        })
    }

    /// Full SSE frame: `data: <JSON>\n\n`.
    pub fn to_sse_frame(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }

    /// Parse one `data: ...` line back into an event (client side).
    pub fn from_sse_line(line: &str) -> Option<Self> {
        let payload = line.strip_prefix("data:")?.trim();
        serde_json::from_str(payload).ok()
    }
}
