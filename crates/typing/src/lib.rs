use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tracing::{debug, error, trace, warn};

use floe_core::error::EventBusError;
use floe_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use floe_core::model::TypingUser;

/// Tracks who is typing in each room.
///
/// Per (room, user) the state machine is absent → typing → absent: a typing
/// event arms an expiry timer, a repeat event re-arms it instead of
/// stacking a second one, and either timer expiry or an explicit stop
/// removes the entry. Every change publishes the room's current typing
/// roster.
pub struct TypingTracker {
    bus: Arc<dyn EventBus>,
    expiry: Duration,
    rooms: Mutex<HashMap<String, HashMap<String, TypingEntry>>>,
}

struct TypingEntry {
    user_name: String,
    expires_at: DateTime<Utc>,
    timer: AbortHandle,
}

impl TypingTracker {
    pub fn new(bus: Arc<dyn EventBus>, expiry: Duration) -> Self {
        Self {
            bus,
            expiry,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// A user started (or kept) typing; the expiry timer restarts.
    pub fn on_typing(self: &Arc<Self>, user: TypingUser) {
        let expires_at =
            Utc::now() + chrono::Duration::from_std(self.expiry).unwrap_or_default();

        {
            let mut rooms = self.rooms.lock().unwrap();
            let entries = rooms.entry(user.room_id.clone()).or_default();

            if let Some(previous) = entries.remove(&user.user_id) {
                trace!(room = %user.room_id, user = %user.user_id, "typing refreshed, re-arming timer");
                previous.timer.abort();
            }

            let this = Arc::clone(self);
            let room = user.room_id.clone();
            let user_id = user.user_id.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(this.expiry).await;
                this.expire(&room, &user_id);
            })
            .abort_handle();

            entries.insert(
                user.user_id.clone(),
                TypingEntry {
                    user_name: user.user_name.clone(),
                    expires_at,
                    timer,
                },
            );
        }

        self.emit_roster(&user.room_id);
    }

    /// A user explicitly stopped typing.
    pub fn on_stop(&self, room_id: &str, user_id: &str) {
        let removed = {
            let mut rooms = self.rooms.lock().unwrap();
            match rooms.get_mut(room_id).and_then(|e| e.remove(user_id)) {
                Some(entry) => {
                    entry.timer.abort();
                    true
                }
                None => false,
            }
        };

        if removed {
            self.emit_roster(room_id);
        }
    }

    /// The room's current typists, ordered by user id.
    pub fn typists(&self, room_id: &str) -> Vec<TypingUser> {
        let rooms = self.rooms.lock().unwrap();
        let mut users: Vec<TypingUser> = rooms
            .get(room_id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(user_id, entry)| TypingUser {
                        user_id: user_id.clone(),
                        room_id: room_id.to_string(),
                        user_name: entry.user_name.clone(),
                        expires_at: entry.expires_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    pub fn clear_room(&self, room_id: &str) {
        let cleared = {
            let mut rooms = self.rooms.lock().unwrap();
            match rooms.remove(room_id) {
                Some(entries) => {
                    for entry in entries.values() {
                        entry.timer.abort();
                    }
                    !entries.is_empty()
                }
                None => false,
            }
        };

        if cleared {
            self.emit_roster(room_id);
        }
    }

    /// Drop every typing entry (app went to background).
    pub fn clear_all(&self) {
        let room_ids: Vec<String> = self.rooms.lock().unwrap().keys().cloned().collect();
        debug!(rooms = room_ids.len(), "clearing all typing state");
        for room_id in room_ids {
            self.clear_room(&room_id);
        }
    }

    fn expire(&self, room_id: &str, user_id: &str) {
        let removed = {
            let mut rooms = self.rooms.lock().unwrap();
            rooms
                .get_mut(room_id)
                .and_then(|e| e.remove(user_id))
                .is_some()
        };

        if removed {
            trace!(room = %room_id, user = %user_id, "typing indicator expired");
            self.emit_roster(room_id);
        }
    }

    fn emit_roster(&self, room_id: &str) {
        let Ok(channel) = Channel::new("store.typing.changed") else {
            return;
        };
        let users = self.typists(room_id);
        let event = Event::new(
            channel,
            EventSource::System("typing".into()),
            EventPayload::TypingRosterChanged {
                room_id: room_id.to_string(),
                users,
            },
        );
        let _ = self.bus.publish(event);
    }

    pub fn handle_event(self: &Arc<Self>, event: &Event) {
        match &event.payload {
            EventPayload::TypingStarted { user } => {
                self.on_typing(user.clone());
            }
            EventPayload::TypingStopped { room_id, user_id } => {
                self.on_stop(room_id, user_id);
            }
            _ => {}
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<(), EventBusError> {
        let mut sub = self.bus.subscribe("remote.typing.**")?;

        loop {
            match sub.recv().await {
                Ok(event) => {
                    self.handle_event(&event);
                }
                Err(EventBusError::ChannelClosed) => {
                    debug!("event bus closed, typing tracker stopping");
                    return Ok(());
                }
                Err(EventBusError::Lagged(count)) => {
                    warn!(count, "typing tracker lagged, some events dropped");
                }
                Err(e) => {
                    error!(error = %e, "typing tracker subscription error");
                    return Err(e);
                }
            }
        }
    }
}
