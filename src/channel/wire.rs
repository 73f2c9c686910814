// JSON envelopes for the live channel: {"event": <name>, "data": <payload>}.
// Event names follow the delivery server's vocabulary; unknown or malformed
// frames are the caller's problem (logged and ignored, never fatal).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{utc_stamp, Message};

/// Client-emitted events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage { text: String },
    Typing { room: String, username: String },
    StopTyping { room: String, username: String },
    JoinRoom { room: String },
}

/// Server-emitted events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(WireMessage),
    RoomUsers(Vec<String>),
    Typing(TypingNotice),
    StopTyping(TypingNotice),
}

/// The live message shape differs from the REST one: `sender`/`text`
/// instead of `username`/`content`, and the room is only present on
/// session-scoped connections.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub id: i64,
    pub sender: String,
    pub text: String,
    #[serde(with = "utc_stamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub room: Option<String>,
}

impl WireMessage {
    pub fn into_message(self, fallback_room: Option<&str>) -> Message {
        let room = self
            .room
            .or_else(|| fallback_room.map(str::to_string))
            .unwrap_or_default();
        Message {
            id: self.id,
            room,
            username: self.sender,
            content: self.text,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypingNotice {
    pub username: String,
    #[serde(default)]
    pub room: Option<String>,
}
