// Read projections of directory-owned entities, plus the message shape
// shared by REST history, search results, and the live channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message. Immutable once delivered; `id` is server-assigned and
/// unique within a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    #[serde(default)]
    pub room: String,
    pub username: String,
    pub content: String,
    #[serde(with = "utc_stamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: i64,
    pub name: String,
}

/// A confirmed friendship. The service pairs every friendship with a
/// private two-party room; the client treats it as an ordinary room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendEdge {
    pub id: i64,
    pub username: String,
    pub room_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: i64,
    pub from_username: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInvite {
    pub id: i64,
    pub room_name: String,
    pub from_user_id: i64,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// Timestamp codec tolerant of the two forms the service actually emits:
/// RFC 3339 with an offset, and naive UTC with no offset at all.
pub mod utc_stamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
            .map_err(serde::de::Error::custom)
    }
}
