use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use floe_core::model::{Message, MessageStatus, PresenceMember};

use crate::rooms::RoomDirectory;
use crate::MessageStore;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unsupported snapshot version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Opaque, versioned state captured for offline display: sanitized,
/// size-capped message and member lists per room. Unconfirmed entries
/// (optimistic or failed) never leave the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub captured_at: DateTime<Utc>,
    pub rooms: Vec<RoomSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub messages: Vec<Message>,
    pub members: Vec<PresenceMember>,
}

impl Snapshot {
    pub fn capture(store: &MessageStore, directory: &RoomDirectory, cap: usize) -> Self {
        let rooms = store
            .rooms_with_messages()
            .into_iter()
            .map(|(room_id, messages)| {
                let mut sanitized: Vec<Message> = messages
                    .into_iter()
                    .filter(|m| {
                        !m.is_optimistic() && m.status != MessageStatus::Failed
                    })
                    .collect();
                if sanitized.len() > cap {
                    let excess = sanitized.len() - cap;
                    sanitized.drain(0..excess);
                }

                let mut members = directory.members(&room_id);
                members.truncate(cap);

                RoomSnapshot {
                    room_id,
                    messages: sanitized,
                    members,
                }
            })
            .collect();

        Self {
            version: SNAPSHOT_VERSION,
            captured_at: Utc::now(),
            rooms,
        }
    }

    pub fn encode(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a snapshot, gating on its version before interpreting the
    /// body so future formats fail cleanly instead of half-parsing.
    pub fn decode(raw: &str) -> Result<Self, SnapshotError> {
        #[derive(Deserialize)]
        struct VersionProbe {
            version: u32,
        }

        let probe: VersionProbe = serde_json::from_str(raw)?;
        if probe.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: probe.version,
                supported: SNAPSHOT_VERSION,
            });
        }

        Ok(serde_json::from_str(raw)?)
    }
}
