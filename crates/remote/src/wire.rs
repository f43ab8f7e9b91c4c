use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use floe_core::error::SyncError;
use floe_core::model::{
    Message, MessageContent, MessageId, MessageStatus, PresenceMember, Reaction, Room,
};

/// Flat wire shape of a message as the remote source serializes it.
///
/// Decoding and encoding are explicit function pairs so every field mapping
/// is statically checked and exercised by round-trip tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub message_type: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub reactions: Vec<WireReaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireReaction {
    pub user_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRoom {
    pub id: String,
    pub name: String,
    pub member_count: u32,
    #[serde(default)]
    pub online_count: u32,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMember {
    pub user_id: String,
    pub display_name: String,
}

pub fn decode_message(wire: WireMessage) -> Result<Message, SyncError> {
    let content = match wire.message_type.as_str() {
        "text" => MessageContent::Text {
            body: required(wire.body, "body")?,
        },
        "image" => MessageContent::Image {
            url: required(wire.media_url, "mediaUrl")?,
            caption: wire.caption,
        },
        "video" => MessageContent::Video {
            url: required(wire.media_url, "mediaUrl")?,
            duration_secs: wire.duration_secs,
        },
        "voice" => MessageContent::Voice {
            url: required(wire.media_url, "mediaUrl")?,
            duration_secs: wire.duration_secs.ok_or_else(|| {
                SyncError::Validation("voice message missing durationSecs".into())
            })?,
        },
        "system" => MessageContent::System {
            body: required(wire.body, "body")?,
        },
        other => {
            return Err(SyncError::Validation(format!(
                "unknown message type: {other}"
            )));
        }
    };

    let status = match wire.status.as_deref() {
        None | Some("sent") => MessageStatus::Sent,
        Some("delivered") => MessageStatus::Delivered,
        Some("read") => MessageStatus::Read,
        Some(other) => {
            return Err(SyncError::Validation(format!(
                "unknown message status: {other}"
            )));
        }
    };

    Ok(Message {
        id: MessageId::Remote(wire.id),
        room_id: wire.room_id,
        sender_id: wire.sender_id,
        sender_name: wire.sender_name,
        content,
        timestamp: wire.timestamp,
        status,
        reply_to: wire.reply_to.map(MessageId::Remote),
        reactions: wire
            .reactions
            .into_iter()
            .map(|r| Reaction {
                user_id: r.user_id,
                emoji: r.emoji,
            })
            .collect(),
    })
}

/// Optimistic entries never cross the wire; encoding one is a programming
/// error surfaced as validation failure.
pub fn encode_message(message: &Message) -> Result<WireMessage, SyncError> {
    let id = match &message.id {
        MessageId::Remote(id) => id.clone(),
        MessageId::Local(_) => {
            return Err(SyncError::Validation(
                "cannot encode an unconfirmed local message".into(),
            ));
        }
    };

    let reply_to = match &message.reply_to {
        None => None,
        Some(MessageId::Remote(id)) => Some(id.clone()),
        Some(MessageId::Local(_)) => {
            return Err(SyncError::Validation(
                "cannot encode a reply to an unconfirmed local message".into(),
            ));
        }
    };

    let (message_type, body, media_url, caption, duration_secs) = match &message.content {
        MessageContent::Text { body } => ("text", Some(body.clone()), None, None, None),
        MessageContent::Image { url, caption } => {
            ("image", None, Some(url.clone()), caption.clone(), None)
        }
        MessageContent::Video { url, duration_secs } => {
            ("video", None, Some(url.clone()), None, *duration_secs)
        }
        MessageContent::Voice { url, duration_secs } => {
            ("voice", None, Some(url.clone()), None, Some(*duration_secs))
        }
        MessageContent::System { body } => ("system", Some(body.clone()), None, None, None),
    };

    let status = match message.status {
        MessageStatus::Sent | MessageStatus::Pending | MessageStatus::Failed => "sent",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Read => "read",
    };

    Ok(WireMessage {
        id,
        room_id: message.room_id.clone(),
        sender_id: message.sender_id.clone(),
        sender_name: message.sender_name.clone(),
        message_type: message_type.to_string(),
        body,
        media_url,
        caption,
        duration_secs,
        timestamp: message.timestamp,
        status: Some(status.to_string()),
        reply_to,
        reactions: message
            .reactions
            .iter()
            .map(|r| WireReaction {
                user_id: r.user_id.clone(),
                emoji: r.emoji.clone(),
            })
            .collect(),
    })
}

pub fn decode_room(wire: WireRoom) -> Room {
    Room {
        id: wire.id,
        name: wire.name,
        member_count: wire.member_count,
        online_count: wire.online_count,
        last_activity: wire.last_activity,
        category: wire.category,
    }
}

pub fn encode_room(room: &Room) -> WireRoom {
    WireRoom {
        id: room.id.clone(),
        name: room.name.clone(),
        member_count: room.member_count,
        online_count: room.online_count,
        last_activity: room.last_activity,
        category: room.category.clone(),
    }
}

pub fn decode_member(wire: WireMember) -> PresenceMember {
    PresenceMember {
        user_id: wire.user_id,
        display_name: wire.display_name,
    }
}

pub fn encode_member(member: &PresenceMember) -> WireMember {
    WireMember {
        user_id: member.user_id.clone(),
        display_name: member.display_name.clone(),
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, SyncError> {
    value.ok_or_else(|| SyncError::Validation(format!("missing required field: {field}")))
}
