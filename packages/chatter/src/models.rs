use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, the resolution used for message timestamps.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// === Tenant (company) chat ===

/// A company-scoped chat message. `id` is `None` until the store assigns one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Option<i64>,
    pub sender: String,
    pub content: String,
    pub company_code: String,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(sender: String, content: String, company_code: String) -> Self {
        Self {
            id: None,
            sender,
            content,
            company_code,
            timestamp: now_millis(),
        }
    }
}

// === Room chat ===

/// What a room frame asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomAction {
    Create,
    Join,
    Chat,
}

impl RoomAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomAction::Create => "CREATE",
            RoomAction::Join => "JOIN",
            RoomAction::Chat => "CHAT",
        }
    }

    /// Parse the wire tag. Tags are case-sensitive, like the rest of the protocol.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "CREATE" => Some(RoomAction::Create),
            "JOIN" => Some(RoomAction::Join),
            "CHAT" => Some(RoomAction::Chat),
            _ => None,
        }
    }

    /// CREATE and JOIN establish the connection's room binding; CHAT relies on it.
    pub fn binds_scope(&self) -> bool {
        matches!(self, RoomAction::Create | RoomAction::Join)
    }
}

impl std::fmt::Display for RoomAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A room-scoped message. CREATE/JOIN records are stored for audit, CHAT
/// records carry the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    pub id: Option<i64>,
    pub sender: String,
    pub content: Option<String>,
    pub room_id: String,
    pub timestamp: i64,
    pub action: RoomAction,
}

impl RoomMessage {
    pub fn new(
        sender: String,
        content: Option<String>,
        room_id: String,
        action: RoomAction,
    ) -> Self {
        Self {
            id: None,
            sender,
            content,
            room_id,
            timestamp: now_millis(),
            action,
        }
    }
}

// === History queries ===

/// Query parameters shared by the history endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}
