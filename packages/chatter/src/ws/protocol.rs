//! Wire protocol
//!
//! Inbound text frames for each endpoint and the validation that turns them
//! into messages. Outbound frames are the serialized [`ChatMessage`] /
//! [`RoomMessage`] values (or, for the global endpoint, the original text).

use serde::Deserialize;

use crate::models::{ChatMessage, RoomAction, RoomMessage};

/// Why an inbound frame was dropped.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("sender `{claimed}` does not match authenticated user `{authenticated}`")]
    IdentityMismatch {
        claimed: String,
        authenticated: String,
    },
}

/// Tenant endpoint frame: `{"sender", "content", "companyCode"}`.
/// `scopeKey` is accepted as an alias for `companyCode`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantFrame {
    sender: Option<String>,
    content: Option<String>,
    #[serde(alias = "scopeKey")]
    company_code: Option<String>,
}

/// Room endpoint frame: `{"sender", "content", "roomId", "action"}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomFrame {
    sender: Option<String>,
    content: Option<String>,
    room_id: Option<String>,
    action: Option<String>,
}

/// Blank strings count as missing.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    present(value).ok_or(ValidationError::MissingField(field))
}

/// Decode and validate a tenant frame.
///
/// With an authenticated `identity`, the frame's sender defaults to it and
/// may not name anyone else.
pub fn decode_tenant(text: &str, identity: Option<&str>) -> Result<ChatMessage, FrameError> {
    let frame: TenantFrame = serde_json::from_str(text)?;

    let sender = match (present(frame.sender), identity) {
        (Some(claimed), Some(authenticated)) if claimed != authenticated => {
            return Err(ValidationError::IdentityMismatch {
                claimed,
                authenticated: authenticated.to_string(),
            }
            .into());
        }
        (Some(sender), _) => sender,
        (None, Some(authenticated)) => authenticated.to_string(),
        (None, None) => return Err(ValidationError::MissingField("sender").into()),
    };
    let company_code = required(frame.company_code, "companyCode")?;
    let content = required(frame.content, "content")?;

    Ok(ChatMessage::new(sender, content, company_code))
}

/// Decode and validate a room frame. `content` is only required for CHAT.
pub fn decode_room(text: &str) -> Result<RoomMessage, FrameError> {
    let frame: RoomFrame = serde_json::from_str(text)?;

    let sender = required(frame.sender, "sender")?;
    let room_id = required(frame.room_id, "roomId")?;
    let tag = required(frame.action, "action")?;
    let action = RoomAction::parse(&tag).ok_or(ValidationError::UnknownAction(tag))?;

    let content = present(frame.content);
    if action == RoomAction::Chat && content.is_none() {
        return Err(ValidationError::MissingField("content").into());
    }

    Ok(RoomMessage::new(sender, content, room_id, action))
}

/// The global endpoint accepts any well-formed JSON value.
pub fn validate_global(text: &str) -> Result<(), FrameError> {
    serde_json::from_str::<serde_json::Value>(text)?;
    Ok(())
}
