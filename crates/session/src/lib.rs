use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use floe_core::config::FloeConfig;
use floe_core::error::{EventBusError, SyncError};
use floe_core::event::{Event, EventBus, EventPayload, EventSubscription};
use floe_core::model::{
    AppPhase, ConnectionStatus, Delivery, DeviceClass, Message, MessageContent, MessageId,
    MessageStatus, PresenceMember, Room, TypingUser,
};
use floe_core::retry::{with_fetch_timeout, RetryPolicy};
use floe_lifecycle::{LifecycleCoordinator, ListenerPriority, Transition};
use floe_paging::PaginationManager;
use floe_remote::network::NetworkMonitor;
use floe_remote::{OutboundMessage, RemoteSource};
use floe_store::retention::RetentionPolicy;
use floe_store::rooms::RoomDirectory;
use floe_store::snapshot::Snapshot;
use floe_store::MessageStore;
use floe_typing::TypingTracker;

/// Who this session acts as.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub user_id: String,
    pub display_name: String,
}

/// The context object the UI collaborator talks to: one instance per
/// process, constructed explicitly and passed around rather than reached
/// through globals, so tests can run any number of isolated sessions.
///
/// Owns the store, paging, typing, and lifecycle components and routes
/// remote pushes into them.
pub struct ChatSession<R: RemoteSource, N: NetworkMonitor> {
    remote: Arc<R>,
    bus: Arc<dyn EventBus>,
    store: Arc<MessageStore>,
    paging: Arc<PaginationManager<R>>,
    typing: Arc<TypingTracker>,
    lifecycle: Arc<LifecycleCoordinator<R, N>>,
    rooms: Arc<RoomDirectory>,
    identity: SessionIdentity,
    retry: RetryPolicy,
    typing_debounce: Duration,
    typing_last_sent: Mutex<HashMap<String, Instant>>,
    joined: Arc<Mutex<HashSet<String>>>,
}

impl<R: RemoteSource, N: NetworkMonitor> ChatSession<R, N> {
    pub fn new(
        bus: Arc<dyn EventBus>,
        remote: Arc<R>,
        network: Arc<N>,
        config: &FloeConfig,
        device: DeviceClass,
        identity: SessionIdentity,
    ) -> Arc<Self> {
        let retry = RetryPolicy::new(
            config.retry.max_attempts,
            config.retry.base_delay(),
            config.retry.max_delay(),
        );
        let store = Arc::new(MessageStore::new(
            Arc::clone(&bus),
            RetentionPolicy::from_config(&config.retention),
        ));
        let paging = Arc::new(PaginationManager::new(
            Arc::clone(&remote),
            Arc::clone(&store),
            retry.clone(),
            device,
            &config.pagination,
        ));
        let typing = Arc::new(TypingTracker::new(Arc::clone(&bus), config.typing.expiry()));
        let lifecycle = Arc::new(LifecycleCoordinator::new(
            Arc::clone(&remote),
            network,
            Arc::clone(&typing),
            Arc::clone(&bus),
            config.lifecycle.clone(),
        ));
        let joined = Arc::new(Mutex::new(HashSet::new()));

        // Suspension bounds memory: sweep loaded history once backgrounded.
        {
            let store = Arc::clone(&store);
            lifecycle.add_listener(
                "retention-sweep",
                Transition::Background,
                ListenerPriority::Low,
                move || {
                    let store = Arc::clone(&store);
                    Box::pin(async move {
                        store.sweep_all();
                        Ok(())
                    })
                },
            );
        }

        // Returning to foreground re-establishes every joined room's
        // subscriptions.
        {
            let remote = Arc::clone(&remote);
            let joined = Arc::clone(&joined);
            let identity = identity.clone();
            lifecycle.add_listener(
                "rejoin-rooms",
                Transition::Foreground,
                ListenerPriority::High,
                move || {
                    let remote = Arc::clone(&remote);
                    let rooms: Vec<String> = joined.lock().unwrap().iter().cloned().collect();
                    let identity = identity.clone();
                    Box::pin(async move {
                        for room_id in rooms {
                            remote
                                .join_room(&room_id, &identity.user_id, &identity.display_name)
                                .await?;
                        }
                        Ok(())
                    })
                },
            );
        }

        Arc::new(Self {
            remote,
            bus,
            store,
            paging,
            typing,
            lifecycle,
            rooms: Arc::new(RoomDirectory::new()),
            identity,
            retry,
            typing_debounce: config.typing.send_debounce(),
            typing_last_sent: Mutex::new(HashMap::new()),
            joined,
        })
    }

    /// Spawn the event loops that keep local state in sync with remote
    /// pushes and connectivity signals.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let typing = Arc::clone(&self.typing);
        handles.push(tokio::spawn(async move {
            if let Err(e) = typing.run().await {
                error!(error = %e, "typing tracker loop ended");
            }
        }));

        handles.push(tokio::spawn(Arc::clone(&self.lifecycle).run()));

        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            if let Err(e) = this.route_remote_events().await {
                error!(error = %e, "remote event loop ended");
            }
        }));

        handles
    }

    pub async fn connect(&self) -> Result<(), SyncError> {
        self.lifecycle.connect().await
    }

    /// Open a room: subscribe remotely, then load the initial history
    /// window. Returns the initial page.
    pub async fn join_room(&self, room_id: &str) -> Result<Vec<Message>, SyncError> {
        self.remote
            .join_room(room_id, &self.identity.user_id, &self.identity.display_name)
            .await?;
        self.joined.lock().unwrap().insert(room_id.to_string());
        self.paging.load_next_batch(room_id, None).await
    }

    /// Leave a room and discard all of its local state.
    pub async fn leave_room(&self, room_id: &str) {
        if let Err(error) = self.remote.leave_room(room_id).await {
            warn!(room = %room_id, error = %error, "leave signal failed");
        }
        self.joined.lock().unwrap().remove(room_id);
        self.store.remove_room(room_id);
        self.paging.remove_room(room_id);
        self.typing.clear_room(room_id);
        self.rooms.forget_members(room_id);
        self.typing_last_sent.lock().unwrap().remove(room_id);
    }

    /// Send a message optimistically: the entry appears immediately with
    /// a local id and `pending` status, then is confirmed in place or
    /// marked `failed` after the retry budget. Returns the local id.
    pub async fn send_message(
        &self,
        room_id: &str,
        content: MessageContent,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, SyncError> {
        if content.is_blank() {
            return Err(SyncError::Validation("message content is empty".into()));
        }

        let message = Message {
            id: MessageId::local(),
            room_id: room_id.to_string(),
            sender_id: self.identity.user_id.clone(),
            sender_name: self.identity.display_name.clone(),
            content: content.clone(),
            timestamp: Utc::now(),
            status: MessageStatus::Pending,
            reply_to: reply_to.clone(),
            reactions: Vec::new(),
        };
        let local_id = message.id.clone();
        self.store.add_local(message);

        let outbound = OutboundMessage {
            room_id: room_id.to_string(),
            sender_id: self.identity.user_id.clone(),
            sender_name: self.identity.display_name.clone(),
            content,
            reply_to,
            local_id: local_id.clone(),
        };

        let remote = Arc::clone(&self.remote);
        let result = self
            .retry
            .run(move || {
                let remote = Arc::clone(&remote);
                let outbound = outbound.clone();
                async move { with_fetch_timeout(remote.send_message(outbound)).await }
            })
            .await;

        match result {
            Ok(confirmed) => {
                self.store
                    .merge(room_id, vec![Delivery::confirmation(confirmed)], false);
                Ok(local_id)
            }
            Err(SyncError::Duplicate) => {
                // The remote already holds this send; nothing to merge.
                debug!(room = %room_id, id = %local_id, "duplicate send treated as delivered");
                self.store
                    .update_status(room_id, &local_id, MessageStatus::Sent);
                Ok(local_id)
            }
            Err(error) => {
                warn!(room = %room_id, id = %local_id, error = %error, "send failed");
                self.store
                    .update_status(room_id, &local_id, MessageStatus::Failed);
                Err(error)
            }
        }
    }

    /// Explicitly re-run a failed send under a fresh local id. The failed
    /// entry is replaced by the new attempt; failed sends are never
    /// retried automatically.
    pub async fn resend(
        &self,
        room_id: &str,
        failed_id: &MessageId,
    ) -> Result<MessageId, SyncError> {
        let failed = self
            .store
            .messages(room_id)
            .into_iter()
            .find(|m| &m.id == failed_id)
            .ok_or_else(|| SyncError::Validation("unknown message".into()))?;
        if failed.status != MessageStatus::Failed {
            return Err(SyncError::Validation("only failed sends can be resent".into()));
        }

        self.store.remove_message(room_id, failed_id);
        self.send_message(room_id, failed.content, failed.reply_to)
            .await
    }

    pub async fn load_older(self: &Arc<Self>, room_id: &str) -> Result<Vec<Message>, SyncError> {
        self.paging.load_older(room_id).await
    }

    pub fn on_scroll(self: &Arc<Self>, room_id: &str, ratio: f32) {
        self.paging.on_scroll(room_id, ratio);
    }

    /// Signal the local user's typing state, debounced so keystrokes do
    /// not flood the remote source.
    pub async fn set_typing(&self, room_id: &str, is_typing: bool) -> Result<(), SyncError> {
        if is_typing {
            let now = Instant::now();
            let mut last_sent = self.typing_last_sent.lock().unwrap();
            if let Some(previous) = last_sent.get(room_id) {
                if now.duration_since(*previous) < self.typing_debounce {
                    return Ok(());
                }
            }
            last_sent.insert(room_id.to_string(), now);
        } else {
            self.typing_last_sent.lock().unwrap().remove(room_id);
        }

        self.remote
            .set_typing(
                room_id,
                &self.identity.user_id,
                &self.identity.display_name,
                is_typing,
            )
            .await
    }

    pub fn messages(&self, room_id: &str) -> Vec<Message> {
        self.store.messages(room_id)
    }

    pub fn typists(&self, room_id: &str) -> Vec<TypingUser> {
        self.typing.typists(room_id)
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.rooms()
    }

    /// Wholesale room-list reload, the same path the periodic remote push
    /// takes.
    pub fn refresh_rooms(&self, rooms: Vec<Room>) {
        self.rooms.refresh(rooms);
    }

    pub fn members(&self, room_id: &str) -> Vec<PresenceMember> {
        self.rooms.members(room_id)
    }

    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.lifecycle.status()
    }

    /// Reactive subscription to client-state changes (`store.**`,
    /// `system.**`, ...).
    pub fn subscribe(&self, pattern: &str) -> Result<EventSubscription, SyncError> {
        self.bus.subscribe(pattern).map_err(SyncError::Bus)
    }

    pub fn handle_phase(self: &Arc<Self>, phase: AppPhase) {
        self.lifecycle.handle_phase(phase);
    }

    /// Explicit memory-pressure hook: sweep every room now.
    pub fn memory_pressure(&self) -> usize {
        self.store.sweep_all()
    }

    /// Capture the sanitized, size-capped offline snapshot.
    pub fn snapshot(&self, cap: usize) -> Snapshot {
        Snapshot::capture(&self.store, &self.rooms, cap)
    }

    pub async fn cleanup(&self) -> Result<(), SyncError> {
        self.remote.cleanup().await
    }

    async fn route_remote_events(self: Arc<Self>) -> Result<(), SyncError> {
        let mut sub = self
            .bus
            .subscribe("{remote,ui}.**")
            .map_err(SyncError::Bus)?;

        loop {
            match sub.recv().await {
                Ok(event) => self.handle_bus_event(&event),
                Err(EventBusError::ChannelClosed) => {
                    debug!("event bus closed, session event loop stopping");
                    return Ok(());
                }
                Err(EventBusError::Lagged(count)) => {
                    warn!(count, "session event loop lagged, some events dropped");
                }
                Err(e) => {
                    error!(error = %e, "session event loop subscription error");
                    return Err(SyncError::Bus(e));
                }
            }
        }
    }

    /// Route a remote push or UI signal into the owning component.
    /// Message batches for a room are applied in receipt order; the
    /// timestamp sort inside the store tolerates out-of-order delivery.
    fn handle_bus_event(self: &Arc<Self>, event: &Event) {
        match &event.payload {
            EventPayload::MessageBatch {
                room_id,
                deliveries,
                is_initial_load,
            } => {
                self.store
                    .merge(room_id, deliveries.clone(), *is_initial_load);
            }
            EventPayload::PresenceRoster { room_id, members } => {
                self.rooms.set_members(room_id, members.clone());
            }
            EventPayload::RoomList { rooms } => {
                self.rooms.refresh(rooms.clone());
            }
            EventPayload::ScrollMoved { room_id, ratio } => {
                self.paging.on_scroll(room_id, *ratio);
            }
            // Typing pushes are consumed by the typing tracker's own loop.
            _ => {}
        }
    }
}
