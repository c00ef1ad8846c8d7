//! Push-connection wire protocol.
//!
//! Server → client: `{"type":"presence", count, moods, users, countries?, timestamp}`
//! and `{"type":"pong"}`. Client → server: `{"type":"mood", "sessionId"?, "mood"}`
//! and `{"type":"ping"}`. Frames are JSON text.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use moodcast_core::{Mood, PresenceSnapshot};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("session {claimed} does not own this connection")]
    SessionMismatch { claimed: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Presence(PresenceSnapshot),
    Pong,
}

impl ServerMessage {
    /// Serialize once; the same frame is fanned out to every socket.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }
}

/// A serialized server message, shared between all recipients.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Mood {
        #[serde(default, rename = "sessionId")]
        session_id: Option<String>,
        /// Left untyped so a non-string mood coerces instead of failing.
        #[serde(default)]
        mood: Option<serde_json::Value>,
    },
    Ping,
}

impl ClientMessage {
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Coerce whatever the client sent as a mood into the closed set.
pub fn coerce_mood(raw: Option<&serde_json::Value>) -> Mood {
    Mood::coerce(raw.and_then(|v| v.as_str()))
}
