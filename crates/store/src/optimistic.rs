use std::collections::HashMap;
use std::sync::Mutex;

use floe_core::model::{Message, MessageContent, MessageId};

/// Tracks locally-created sends awaiting server confirmation.
///
/// A confirmation claims the *oldest* unresolved entry with the same sender
/// and content, so each confirmed record replaces at most one optimistic
/// message. Entries leave the tracker on confirmation, on failure, or when
/// their room is dropped — a late confirmation of a forgotten send inserts
/// as an ordinary message instead of re-replacing.
#[derive(Debug, Default)]
pub struct OptimisticTracker {
    pending: Mutex<HashMap<String, Vec<PendingSend>>>,
}

#[derive(Debug, Clone)]
struct PendingSend {
    local_id: MessageId,
    sender_id: String,
    content: MessageContent,
}

impl OptimisticTracker {
    pub fn track(&self, message: &Message) {
        debug_assert!(message.is_optimistic());
        let mut pending = self.pending.lock().unwrap();
        pending
            .entry(message.room_id.clone())
            .or_default()
            .push(PendingSend {
                local_id: message.id.clone(),
                sender_id: message.sender_id.clone(),
                content: message.content.clone(),
            });
    }

    /// Claim and return the oldest unresolved entry matching the
    /// confirmation, if any.
    pub fn resolve_match(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &MessageContent,
    ) -> Option<MessageId> {
        let mut pending = self.pending.lock().unwrap();
        let entries = pending.get_mut(room_id)?;
        let index = entries
            .iter()
            .position(|p| p.sender_id == sender_id && &p.content == content)?;
        Some(entries.remove(index).local_id)
    }

    /// Drop an entry without resolving it (failed or superseded send).
    pub fn forget(&self, room_id: &str, id: &MessageId) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let Some(entries) = pending.get_mut(room_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|p| &p.local_id != id);
        entries.len() != before
    }

    pub fn pending_count(&self, room_id: &str) -> usize {
        self.pending
            .lock()
            .unwrap()
            .get(room_id)
            .map_or(0, Vec::len)
    }

    pub fn clear_room(&self, room_id: &str) {
        self.pending.lock().unwrap().remove(room_id);
    }
}
