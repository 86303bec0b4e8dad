use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// === Chat models ===

/// Payload exchanged over a chat channel.
///
/// All three fields are required strings; anything else the client sends
/// alongside them is ignored by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: String,
    pub receiver: String,
    pub message: String,
}

/// Store-assigned message identifier.
///
/// Rendered on the wire as a decimal string so callers treat it as an opaque
/// token rather than a number to do arithmetic on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<i64>()
            .map(MessageId)
            .map_err(serde::de::Error::custom)
    }
}

/// A persisted chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: String,
    pub receiver: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Optional window over a history query. The default is unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryPage {
    /// Only messages with an id strictly greater than this
    pub after: Option<MessageId>,
    pub limit: Option<i64>,
}

// === User directory ===

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub created_at: i64,
    pub updated_at: i64,
}
