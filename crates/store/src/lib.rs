use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use floe_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use floe_core::model::{Delivery, Message, MessageId, MessageStatus};

pub mod optimistic;
pub mod retention;
pub mod rooms;
pub mod snapshot;

use optimistic::OptimisticTracker;
use retention::RetentionPolicy;

/// The authoritative in-memory message list per room.
///
/// Every mutation of a room's list funnels through this store's methods and
/// serializes on the interior lock, so merges for a room never interleave.
/// Post-merge the list always holds exactly one entry per id, ascending by
/// timestamp.
pub struct MessageStore {
    rooms: RwLock<HashMap<String, Vec<Message>>>,
    tracker: OptimisticTracker,
    retention: RetentionPolicy,
    bus: Arc<dyn EventBus>,
}

impl MessageStore {
    pub fn new(bus: Arc<dyn EventBus>, retention: RetentionPolicy) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            tracker: OptimisticTracker::default(),
            retention,
            bus,
        }
    }

    /// Merge a batch from the remote layer into a room.
    ///
    /// On an initial load the batch replaces the room's list wholesale. On
    /// an incremental merge, a delivery flagged `confirms_send` overwrites
    /// the oldest matching optimistic entry in place (its list index is
    /// already correct, so no re-sort); anything else updates the entry
    /// with the same id or appends. The list is re-sorted only when an
    /// append or a timestamp change occurred.
    pub fn merge(&self, room_id: &str, incoming: Vec<Delivery>, is_initial_load: bool) {
        let count = incoming.len();
        {
            let mut rooms = self.rooms.write().unwrap();
            let list = rooms.entry(room_id.to_string()).or_default();

            if is_initial_load {
                *list = incoming.into_iter().map(|d| d.message).collect();
                list.sort_by_key(|m| m.timestamp);
            } else {
                let mut needs_sort = false;
                for delivery in incoming {
                    needs_sort |= Self::merge_one(&self.tracker, room_id, list, delivery);
                }
                if needs_sort {
                    list.sort_by_key(|m| m.timestamp);
                }
            }
        }

        debug!(room = %room_id, count, is_initial_load, "merged batch");
        self.emit_room_updated(room_id);
    }

    /// Returns true when the merge appended or moved an entry and the list
    /// needs re-sorting.
    fn merge_one(
        tracker: &OptimisticTracker,
        room_id: &str,
        list: &mut Vec<Message>,
        delivery: Delivery,
    ) -> bool {
        let message = delivery.message;

        if delivery.confirms_send {
            if let Some(local_id) =
                tracker.resolve_match(room_id, &message.sender_id, &message.content)
            {
                if let Some(slot) = list.iter_mut().find(|m| m.id == local_id) {
                    trace!(room = %room_id, id = %message.id, "confirmed optimistic send in place");
                    *slot = message;
                    return false;
                }
                // The optimistic entry was swept before the confirmation
                // arrived; fall through to a plain insert.
            }
            if list.iter().any(|m| m.id == message.id) {
                trace!(room = %room_id, id = %message.id, "dropping duplicate confirmation");
                return false;
            }
            list.push(message);
            return true;
        }

        if let Some(existing) = list.iter_mut().find(|m| m.id == message.id) {
            let timestamp_moved = existing.timestamp != message.timestamp;
            existing.sender_name = message.sender_name;
            existing.content = message.content;
            existing.status = message.status;
            existing.reply_to = message.reply_to;
            existing.reactions = message.reactions;
            existing.timestamp = message.timestamp;
            timestamp_moved
        } else {
            list.push(message);
            true
        }
    }

    /// Add a locally-created optimistic message and start tracking it for
    /// confirmation matching.
    pub fn add_local(&self, message: Message) {
        debug_assert!(message.is_optimistic());
        self.tracker.track(&message);

        let room_id = message.room_id.clone();
        {
            let mut rooms = self.rooms.write().unwrap();
            let list = rooms.entry(room_id.clone()).or_default();
            list.push(message);
            list.sort_by_key(|m| m.timestamp);
        }

        self.emit_room_updated(&room_id);
    }

    /// Update a single message's status. Marking a local entry failed stops
    /// tracking it, so a late confirmation can no longer claim it.
    pub fn update_status(&self, room_id: &str, id: &MessageId, status: MessageStatus) -> bool {
        {
            let mut rooms = self.rooms.write().unwrap();
            let Some(list) = rooms.get_mut(room_id) else {
                return false;
            };
            let Some(message) = list.iter_mut().find(|m| &m.id == id) else {
                return false;
            };
            message.status = status;
        }

        if status == MessageStatus::Failed && id.is_local() {
            self.tracker.forget(room_id, id);
        }

        self.emit(
            "store.message.status",
            EventPayload::MessageStatusChanged {
                room_id: room_id.to_string(),
                id: id.clone(),
                status,
            },
        );
        true
    }

    /// The room's messages, ascending by timestamp.
    pub fn messages(&self, room_id: &str) -> Vec<Message> {
        self.rooms
            .read()
            .unwrap()
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn message_count(&self, room_id: &str) -> usize {
        self.rooms.read().unwrap().get(room_id).map_or(0, Vec::len)
    }

    /// Timestamp of the oldest loaded message, the backward-paging cursor.
    pub fn oldest_timestamp(&self, room_id: &str) -> Option<DateTime<Utc>> {
        self.rooms
            .read()
            .unwrap()
            .get(room_id)
            .and_then(|list| list.first())
            .map(|m| m.timestamp)
    }

    /// Remove a single message (explicit resend replaces its failed entry).
    pub fn remove_message(&self, room_id: &str, id: &MessageId) -> bool {
        let removed = {
            let mut rooms = self.rooms.write().unwrap();
            let Some(list) = rooms.get_mut(room_id) else {
                return false;
            };
            let before = list.len();
            list.retain(|m| &m.id != id);
            list.len() != before
        };

        if removed {
            if id.is_local() {
                self.tracker.forget(room_id, id);
            }
            self.emit_room_updated(room_id);
        }
        removed
    }

    /// Drop all state for a room (room left).
    pub fn remove_room(&self, room_id: &str) {
        self.rooms.write().unwrap().remove(room_id);
        self.tracker.clear_room(room_id);
        self.emit_room_updated(room_id);
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.read().unwrap().keys().cloned().collect()
    }

    /// Apply the retention policy to one room. Returns the eviction count.
    pub fn sweep(&self, room_id: &str) -> usize {
        let now = Utc::now();
        let evicted = {
            let mut rooms = self.rooms.write().unwrap();
            match rooms.get_mut(room_id) {
                Some(list) => self.retention.apply(list, now),
                None => 0,
            }
        };

        if evicted > 0 {
            debug!(room = %room_id, evicted, "retention sweep evicted messages");
            self.emit(
                "system.sweep.completed",
                EventPayload::SweepCompleted {
                    room_id: room_id.to_string(),
                    evicted,
                },
            );
            self.emit_room_updated(room_id);
        }
        evicted
    }

    /// Sweep every room. Returns the total eviction count.
    pub fn sweep_all(&self) -> usize {
        self.room_ids().iter().map(|room| self.sweep(room)).sum()
    }

    pub fn pending_count(&self, room_id: &str) -> usize {
        self.tracker.pending_count(room_id)
    }

    pub(crate) fn rooms_with_messages(&self) -> Vec<(String, Vec<Message>)> {
        self.rooms
            .read()
            .unwrap()
            .iter()
            .map(|(room, list)| (room.clone(), list.clone()))
            .collect()
    }

    fn emit_room_updated(&self, room_id: &str) {
        self.emit(
            "store.room.updated",
            EventPayload::RoomUpdated {
                room_id: room_id.to_string(),
            },
        );
    }

    fn emit(&self, channel_name: &str, payload: EventPayload) {
        let Ok(channel) = Channel::new(channel_name) else {
            return;
        };
        let event = Event::new(channel, EventSource::System("store".into()), payload);
        let _ = self.bus.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use floe_core::event::BroadcastEventBus;
    use floe_core::model::MessageContent;

    fn make_store() -> MessageStore {
        let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        MessageStore::new(bus, RetentionPolicy::default())
    }

    fn ts(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn remote_message(id: &str, sender: &str, body: &str, at: i64) -> Message {
        Message {
            id: MessageId::Remote(id.into()),
            room_id: "general".into(),
            sender_id: sender.into(),
            sender_name: sender.to_uppercase(),
            content: MessageContent::text(body),
            timestamp: ts(at),
            status: MessageStatus::Sent,
            reply_to: None,
            reactions: Vec::new(),
        }
    }

    fn local_message(sender: &str, body: &str, at: i64) -> Message {
        Message {
            id: MessageId::local(),
            room_id: "general".into(),
            sender_id: sender.into(),
            sender_name: sender.to_uppercase(),
            content: MessageContent::text(body),
            timestamp: ts(at),
            status: MessageStatus::Pending,
            reply_to: None,
            reactions: Vec::new(),
        }
    }

    fn ids(store: &MessageStore, room: &str) -> Vec<MessageId> {
        store.messages(room).into_iter().map(|m| m.id).collect()
    }

    fn assert_invariants(store: &MessageStore, room: &str) {
        let messages = store.messages(room);
        for pair in messages.windows(2) {
            assert!(
                pair[0].timestamp <= pair[1].timestamp,
                "list must ascend by timestamp"
            );
        }
        let mut seen = std::collections::HashSet::new();
        for m in &messages {
            assert!(seen.insert(m.id.clone()), "duplicate id {}", m.id);
        }
    }

    #[test]
    fn out_of_order_arrivals_end_up_sorted() {
        let store = make_store();
        store.merge(
            "general",
            vec![Delivery::plain(remote_message("m2", "u1", "second", 2000))],
            false,
        );
        store.merge(
            "general",
            vec![Delivery::plain(remote_message("m1", "u1", "first", 1000))],
            false,
        );

        assert_eq!(
            ids(&store, "general"),
            vec![
                MessageId::Remote("m1".into()),
                MessageId::Remote("m2".into())
            ]
        );
        assert_invariants(&store, "general");
    }

    #[test]
    fn initial_load_replaces_wholesale() {
        let store = make_store();
        store.merge(
            "general",
            vec![Delivery::plain(remote_message("stale", "u1", "old", 500))],
            false,
        );

        store.merge(
            "general",
            vec![
                Delivery::plain(remote_message("a", "u1", "one", 1000)),
                Delivery::plain(remote_message("b", "u2", "two", 2000)),
            ],
            true,
        );

        assert_eq!(
            ids(&store, "general"),
            vec![MessageId::Remote("a".into()), MessageId::Remote("b".into())]
        );
    }

    #[test]
    fn same_id_shallow_merges_instead_of_duplicating() {
        let store = make_store();
        store.merge(
            "general",
            vec![Delivery::plain(remote_message("m1", "u1", "hello", 1000))],
            false,
        );

        let mut edited = remote_message("m1", "u1", "hello (edited)", 1000);
        edited.status = MessageStatus::Read;
        store.merge("general", vec![Delivery::plain(edited)], false);

        let messages = store.messages("general");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, MessageContent::text("hello (edited)"));
        assert_eq!(messages[0].status, MessageStatus::Read);
    }

    #[test]
    fn edited_timestamp_triggers_reorder() {
        let store = make_store();
        store.merge(
            "general",
            vec![
                Delivery::plain(remote_message("m1", "u1", "one", 1000)),
                Delivery::plain(remote_message("m2", "u1", "two", 2000)),
            ],
            false,
        );

        let mut moved = remote_message("m1", "u1", "one", 3000);
        moved.content = MessageContent::text("one (bumped)");
        store.merge("general", vec![Delivery::plain(moved)], false);

        assert_eq!(
            ids(&store, "general"),
            vec![
                MessageId::Remote("m2".into()),
                MessageId::Remote("m1".into())
            ]
        );
        assert_invariants(&store, "general");
    }

    #[test]
    fn confirmation_replaces_optimistic_in_place_exactly_once() {
        let store = make_store();
        let local = local_message("u1", "hi", 1000);
        let local_id = local.id.clone();
        store.add_local(local);
        store.merge(
            "general",
            vec![Delivery::plain(remote_message("m9", "u2", "later", 5000))],
            false,
        );

        let confirmed = remote_message("srv-1", "u1", "hi", 1100);
        store.merge(
            "general",
            vec![Delivery::confirmation(confirmed.clone())],
            false,
        );

        // Replaced in place: confirmed record occupies the optimistic slot.
        let messages = store.messages("general");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, MessageId::Remote("srv-1".into()));
        assert!(!messages.iter().any(|m| m.id == local_id));
        assert_eq!(store.pending_count("general"), 0);

        // A second identical confirmation neither duplicates nor
        // re-replaces.
        store.merge("general", vec![Delivery::confirmation(confirmed)], false);
        assert_eq!(store.messages("general").len(), 2);
        assert_invariants(&store, "general");
    }

    #[test]
    fn two_identical_sends_each_claim_one_confirmation() {
        let store = make_store();
        let first = local_message("u1", "hi", 1000);
        let second = local_message("u1", "hi", 1500);
        let first_id = first.id.clone();
        let second_id = second.id.clone();
        store.add_local(first);
        store.add_local(second);

        store.merge(
            "general",
            vec![Delivery::confirmation(remote_message(
                "srv-1", "u1", "hi", 1050,
            ))],
            false,
        );

        let messages = store.messages("general");
        assert!(!messages.iter().any(|m| m.id == first_id));
        assert!(messages.iter().any(|m| m.id == second_id));

        store.merge(
            "general",
            vec![Delivery::confirmation(remote_message(
                "srv-2", "u1", "hi", 1550,
            ))],
            false,
        );
        assert_eq!(store.pending_count("general"), 0);
        assert_eq!(store.messages("general").len(), 2);
        assert_invariants(&store, "general");
    }

    #[test]
    fn confirmation_without_match_appends() {
        let store = make_store();
        store.merge(
            "general",
            vec![Delivery::confirmation(remote_message(
                "srv-1", "u1", "hi", 1000,
            ))],
            false,
        );
        assert_eq!(ids(&store, "general"), vec![MessageId::Remote("srv-1".into())]);
    }

    #[test]
    fn failed_send_stays_visible_and_stops_matching() {
        let store = make_store();
        let local = local_message("u1", "hi", 1000);
        let local_id = local.id.clone();
        store.add_local(local);

        assert!(store.update_status("general", &local_id, MessageStatus::Failed));

        let messages = store.messages("general");
        assert_eq!(messages[0].status, MessageStatus::Failed);

        // The late confirmation inserts as an ordinary message; the failed
        // entry remains.
        store.merge(
            "general",
            vec![Delivery::confirmation(remote_message(
                "srv-1", "u1", "hi", 1200,
            ))],
            false,
        );
        let messages = store.messages("general");
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().any(|m| m.id == local_id));
        assert_invariants(&store, "general");
    }

    #[test]
    fn update_status_unknown_message_is_false() {
        let store = make_store();
        assert!(!store.update_status(
            "general",
            &MessageId::Remote("nope".into()),
            MessageStatus::Read
        ));
    }

    #[test]
    fn merges_are_partitioned_per_room() {
        let store = make_store();
        store.merge(
            "general",
            vec![Delivery::plain(remote_message("g1", "u1", "a", 1000))],
            false,
        );
        let mut other = remote_message("l1", "u1", "b", 900);
        other.room_id = "lobby".into();
        store.merge("lobby", vec![Delivery::plain(other)], false);

        assert_eq!(store.message_count("general"), 1);
        assert_eq!(store.message_count("lobby"), 1);

        store.remove_room("lobby");
        assert_eq!(store.message_count("lobby"), 0);
        assert_eq!(store.message_count("general"), 1);
    }

    #[test]
    fn sweep_caps_to_most_recent_two_hundred() {
        let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let store = MessageStore::new(bus, RetentionPolicy::new(Duration::days(7), 200));

        let now = Utc::now();
        let deliveries: Vec<_> = (0..250)
            .map(|n| {
                let mut m = remote_message(&format!("m{n}"), "u1", "x", 0);
                m.timestamp = now - Duration::seconds(300 - n);
                Delivery::plain(m)
            })
            .collect();
        store.merge("general", deliveries, false);

        let evicted = store.sweep("general");
        assert_eq!(evicted, 50);
        assert_eq!(store.message_count("general"), 200);

        let messages = store.messages("general");
        assert_eq!(messages[0].id, MessageId::Remote("m50".into()));
    }

    #[tokio::test]
    async fn sweep_emits_completion_event() {
        let bus_impl = Arc::new(BroadcastEventBus::default());
        let bus: Arc<dyn EventBus> = bus_impl.clone();
        let store = MessageStore::new(bus, RetentionPolicy::new(Duration::days(7), 1));

        let now = Utc::now();
        let mut first = remote_message("m1", "u1", "a", 0);
        first.timestamp = now - Duration::seconds(10);
        let mut second = remote_message("m2", "u1", "b", 0);
        second.timestamp = now;
        store.merge(
            "general",
            vec![Delivery::plain(first), Delivery::plain(second)],
            false,
        );

        let mut sub = bus_impl.subscribe("system.sweep.**").unwrap();
        assert_eq!(store.sweep_all(), 1);

        let event = tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::SweepCompleted { evicted: 1, .. }
        ));
    }

    #[test]
    fn remove_message_drops_failed_entry() {
        let store = make_store();
        let local = local_message("u1", "hi", 1000);
        let local_id = local.id.clone();
        store.add_local(local);
        store.update_status("general", &local_id, MessageStatus::Failed);

        assert!(store.remove_message("general", &local_id));
        assert!(store.messages("general").is_empty());
        assert!(!store.remove_message("general", &local_id));
    }

    #[test]
    fn oldest_timestamp_reflects_sorted_head() {
        let store = make_store();
        assert!(store.oldest_timestamp("general").is_none());

        store.merge(
            "general",
            vec![
                Delivery::plain(remote_message("m2", "u1", "b", 2000)),
                Delivery::plain(remote_message("m1", "u1", "a", 1000)),
            ],
            false,
        );
        assert_eq!(store.oldest_timestamp("general"), Some(ts(1000)));
    }
}
