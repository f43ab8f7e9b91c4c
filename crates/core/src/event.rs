use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::EventBusError;
use crate::model::{
    AppPhase, ConnectionStatus, Delivery, MessageId, MessageStatus, NetworkState, PresenceMember,
    Room, TypingUser,
};

/// Hierarchical channel name validation and parsing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Channel(String);

impl Channel {
    /// Create a new channel, validating its format.
    pub fn new(name: impl Into<String>) -> Result<Self, EventBusError> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(EventBusError::InvalidChannel(name))
        }
    }

    /// Check if a channel name is valid.
    pub fn is_valid(name: &str) -> bool {
        if name.is_empty() || name.starts_with('.') || name.ends_with('.') || name.contains("..") {
            return false;
        }

        // Lowercase segments of a-z, 0-9 and dots only.
        if name
            .chars()
            .any(|c| !matches!(c, 'a'..='z' | '0'..='9' | '.'))
        {
            return false;
        }

        matches!(
            name.split('.').next().unwrap_or_default(),
            "system" | "remote" | "ui" | "store"
        )
    }

    /// Get the domain of the channel.
    pub fn domain(&self) -> &str {
        self.0.split('.').next().unwrap_or("")
    }

    /// Get the full channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

/// The standard envelope wrapping every event in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Hierarchical channel name (e.g., "remote.message.batch")
    pub channel: Channel,

    /// When the event was created (UTC)
    pub timestamp: DateTime<Utc>,

    /// Unique identifier for this event
    pub id: Uuid,

    /// Optional correlation ID linking related events
    pub correlation_id: Option<Uuid>,

    /// Source component that emitted this event
    pub source: EventSource,

    /// The typed event payload
    pub payload: EventPayload,
}

impl Event {
    pub fn new(channel: Channel, source: EventSource, payload: EventPayload) -> Self {
        Self {
            channel,
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            correlation_id: None,
            source,
            payload,
        }
    }

    pub fn with_correlation(
        channel: Channel,
        source: EventSource,
        payload: EventPayload,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            channel,
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            correlation_id: Some(correlation_id),
            source,
            payload,
        }
    }
}

/// Identifies the component that emitted an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum EventSource {
    /// Core sync component, by name ("store", "paging", "lifecycle", ...)
    System(String),
    /// The remote message source
    Remote,
    /// The UI collaborator
    Ui,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EventPayload {
    // ── System / lifecycle events ─────────────────────────────────
    ConnectionChanged {
        status: ConnectionStatus,
    },
    PhaseChanged {
        phase: AppPhase,
    },
    NetworkChanged {
        state: NetworkState,
    },
    SweepCompleted {
        room_id: String,
        evicted: usize,
    },
    ErrorOccurred {
        component: String,
        message: String,
        recoverable: bool,
    },

    // ── Remote pushes ─────────────────────────────────────────────
    MessageBatch {
        room_id: String,
        deliveries: Vec<Delivery>,
        is_initial_load: bool,
    },
    TypingStarted {
        user: TypingUser,
    },
    TypingStopped {
        room_id: String,
        user_id: String,
    },
    PresenceRoster {
        room_id: String,
        members: Vec<PresenceMember>,
    },
    RoomList {
        rooms: Vec<Room>,
    },

    // ── UI events ─────────────────────────────────────────────────
    ScrollMoved {
        room_id: String,
        /// 0.0 = newest edge, 1.0 = oldest loaded message.
        ratio: f32,
    },

    // ── Store change notifications ────────────────────────────────
    RoomUpdated {
        room_id: String,
    },
    MessageStatusChanged {
        room_id: String,
        id: MessageId,
        status: MessageStatus,
    },
    TypingRosterChanged {
        room_id: String,
        users: Vec<TypingUser>,
    },
}

pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, event: Event) -> Result<(), EventBusError>;
    fn subscribe(&self, pattern: &str) -> Result<EventSubscription, EventBusError>;
}

/// Broadcast bus partitioned by channel domain so a subscriber only drains
/// the domains its pattern can match.
#[derive(Clone)]
pub struct BroadcastEventBus {
    system_sender: broadcast::Sender<Event>,
    remote_sender: broadcast::Sender<Event>,
    ui_sender: broadcast::Sender<Event>,
    store_sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

    pub fn new(channel_capacity: usize) -> Self {
        let capacity = channel_capacity.max(1);
        let (system_sender, _) = broadcast::channel(capacity);
        let (remote_sender, _) = broadcast::channel(capacity);
        let (ui_sender, _) = broadcast::channel(capacity);
        let (store_sender, _) = broadcast::channel(capacity);

        Self {
            system_sender,
            remote_sender,
            ui_sender,
            store_sender,
        }
    }

    fn sender_for_domain(&self, domain: &str) -> Option<&broadcast::Sender<Event>> {
        match domain {
            "system" => Some(&self.system_sender),
            "remote" => Some(&self.remote_sender),
            "ui" => Some(&self.ui_sender),
            "store" => Some(&self.store_sender),
            _ => None,
        }
    }

    fn receivers_for_pattern(&self, pattern: &str) -> Result<DomainReceivers, EventBusError> {
        let first_segment = pattern.split('.').next().unwrap_or_default();

        if first_segment.is_empty() {
            return Err(EventBusError::InvalidPattern(pattern.to_string()));
        }

        if has_glob_meta(first_segment) {
            return Ok(DomainReceivers {
                system: Some(self.system_sender.subscribe()),
                remote: Some(self.remote_sender.subscribe()),
                ui: Some(self.ui_sender.subscribe()),
                store: Some(self.store_sender.subscribe()),
            });
        }

        let mut receivers = DomainReceivers {
            system: None,
            remote: None,
            ui: None,
            store: None,
        };
        match first_segment {
            "system" => receivers.system = Some(self.system_sender.subscribe()),
            "remote" => receivers.remote = Some(self.remote_sender.subscribe()),
            "ui" => receivers.ui = Some(self.ui_sender.subscribe()),
            "store" => receivers.store = Some(self.store_sender.subscribe()),
            _ => return Err(EventBusError::InvalidPattern(pattern.to_string())),
        }
        Ok(receivers)
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: Event) -> Result<(), EventBusError> {
        let sender = self
            .sender_for_domain(event.channel.domain())
            .ok_or_else(|| EventBusError::InvalidChannel(event.channel.to_string()))?;

        let _ = sender.send(event);
        Ok(())
    }

    fn subscribe(&self, pattern: &str) -> Result<EventSubscription, EventBusError> {
        let matcher = Glob::new(pattern)
            .map_err(|_| EventBusError::InvalidPattern(pattern.to_string()))?
            .compile_matcher();
        let receivers = self.receivers_for_pattern(pattern)?;

        Ok(EventSubscription { matcher, receivers })
    }
}

struct DomainReceivers {
    system: Option<broadcast::Receiver<Event>>,
    remote: Option<broadcast::Receiver<Event>>,
    ui: Option<broadcast::Receiver<Event>>,
    store: Option<broadcast::Receiver<Event>>,
}

pub struct EventSubscription {
    matcher: GlobMatcher,
    receivers: DomainReceivers,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Result<Event, EventBusError> {
        loop {
            let system_receiver = self.receivers.system.as_mut();
            let remote_receiver = self.receivers.remote.as_mut();
            let ui_receiver = self.receivers.ui.as_mut();
            let store_receiver = self.receivers.store.as_mut();

            let received = tokio::select! {
                result = recv_from_domain(system_receiver) => result,
                result = recv_from_domain(remote_receiver) => result,
                result = recv_from_domain(ui_receiver) => result,
                result = recv_from_domain(store_receiver) => result,
            };

            match received {
                Ok(event) if self.matcher.is_match(event.channel.as_str()) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    return Err(EventBusError::Lagged(count));
                }
            }
        }
    }
}

async fn recv_from_domain(
    receiver: Option<&mut broadcast::Receiver<Event>>,
) -> Result<Event, broadcast::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn has_glob_meta(segment: &str) -> bool {
    segment.contains('*')
        || segment.contains('?')
        || segment.contains('[')
        || segment.contains(']')
        || segment.contains('{')
        || segment.contains('}')
        || segment.contains('!')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_validation() {
        assert!(Channel::is_valid("system.connection.changed"));
        assert!(Channel::is_valid("remote.message.batch"));
        assert!(Channel::is_valid("ui.scroll.moved"));
        assert!(Channel::is_valid("store.room.updated"));

        assert!(!Channel::is_valid("xmpp.message.received"));
        assert!(!Channel::is_valid("system..double.dot"));
        assert!(!Channel::is_valid(".starts.with.dot"));
        assert!(!Channel::is_valid("ends.with.dot."));
        assert!(!Channel::is_valid("UpperCase"));
        assert!(!Channel::is_valid("with-hyphen"));
        assert!(!Channel::is_valid(""));
    }

    #[test]
    fn channel_domain() {
        let c = Channel::new("remote.typing.started").unwrap();
        assert_eq!(c.domain(), "remote");
    }

    #[test]
    fn channel_new_rejects_invalid() {
        let result = Channel::new("bad.domain.event");
        assert!(matches!(
            result,
            Err(EventBusError::InvalidChannel(name)) if name == "bad.domain.event"
        ));
    }

    #[test]
    fn event_new_fields() {
        let channel = Channel::new("system.phase.changed").unwrap();
        let event = Event::new(
            channel.clone(),
            EventSource::System("lifecycle".into()),
            EventPayload::PhaseChanged {
                phase: AppPhase::Active,
            },
        );

        assert_eq!(event.channel, channel);
        assert!(event.correlation_id.is_none());
        assert!(!event.id.is_nil());
    }

    #[test]
    fn event_with_correlation() {
        let corr_id = Uuid::new_v4();
        let event = Event::with_correlation(
            Channel::new("system.sweep.completed").unwrap(),
            EventSource::System("store".into()),
            EventPayload::SweepCompleted {
                room_id: "general".into(),
                evicted: 3,
            },
            corr_id,
        );
        assert_eq!(event.correlation_id, Some(corr_id));
    }
}
