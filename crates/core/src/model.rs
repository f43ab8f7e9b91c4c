use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message identity.
///
/// A send is created under a client-generated [`MessageId::Local`] and keeps
/// it until the server confirms the write, so optimistic entries can never
/// collide with server-assigned ids and "is this optimistic?" is a
/// discriminator check rather than an id-format convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum MessageId {
    Local(Uuid),
    Remote(String),
}

impl MessageId {
    /// Mint a fresh local id for an outgoing send.
    pub fn local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Local(id) => write!(f, "local:{id}"),
            MessageId::Remote(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

/// Message payload, one variant per message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum MessageContent {
    Text {
        body: String,
    },
    Image {
        url: String,
        caption: Option<String>,
    },
    Video {
        url: String,
        duration_secs: Option<u32>,
    },
    Voice {
        url: String,
        duration_secs: u32,
    },
    System {
        body: String,
    },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    /// The user-visible text of this content, if it has one.
    pub fn body(&self) -> Option<&str> {
        match self {
            MessageContent::Text { body } | MessageContent::System { body } => Some(body),
            MessageContent::Image { caption, .. } => caption.as_deref(),
            MessageContent::Video { .. } | MessageContent::Voice { .. } => None,
        }
    }

    /// True when the content carries no sendable payload at all.
    pub fn is_blank(&self) -> bool {
        match self {
            MessageContent::Text { body } | MessageContent::System { body } => {
                body.trim().is_empty()
            }
            MessageContent::Image { url, .. }
            | MessageContent::Video { url, .. }
            | MessageContent::Voice { url, .. } => url.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub reply_to: Option<MessageId>,
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// An entry added locally on send and still awaiting its confirmed
    /// counterpart (or a failure mark).
    pub fn is_optimistic(&self) -> bool {
        self.id.is_local()
    }
}

/// The unit the remote layer hands to the store's merge operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub message: Message,
    /// Set by the remote layer when this record supersedes a pending local
    /// write and should replace the matching optimistic entry in place.
    pub confirms_send: bool,
}

impl Delivery {
    pub fn plain(message: Message) -> Self {
        Self {
            message,
            confirms_send: false,
        }
    }

    pub fn confirmation(message: Message) -> Self {
        Self {
            message,
            confirms_send: true,
        }
    }
}

/// Read-mostly room descriptor, refreshed by wholesale reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    pub member_count: u32,
    pub online_count: u32,
    pub last_activity: DateTime<Utc>,
    pub category: Option<String>,
}

/// Ephemeral typing indicator entry for one user in one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUser {
    pub user_id: String,
    pub room_id: String,
    pub user_name: String,
    pub expires_at: DateTime<Utc>,
}

/// A currently-connected member of a room, distinct from persisted
/// membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMember {
    pub user_id: String,
    pub display_name: String,
}

/// Process-wide connection state. Written only by the lifecycle
/// coordinator; everything else reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// App foreground/background phase as reported by the platform shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppPhase {
    Active,
    Inactive,
    Background,
}

/// Raw connectivity flags from the platform network signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub is_connected: bool,
    pub is_internet_reachable: bool,
}

impl NetworkState {
    pub fn online() -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: true,
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: false,
        }
    }

    pub fn usable(&self) -> bool {
        self.is_connected && self.is_internet_reachable
    }
}

/// Coarse device capability class feeding adaptive batch sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceClass {
    #[default]
    Standard,
    Constrained,
}
