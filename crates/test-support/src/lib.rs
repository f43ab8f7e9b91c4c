//! Hand-rolled fakes for exercising the synchronization core without a
//! real backend: a scriptable [`FakeRemote`], a scriptable [`FakeNetwork`],
//! and message builders.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::watch;

use floe_core::error::SyncError;
use floe_core::model::{
    Message, MessageContent, MessageId, MessageStatus, NetworkState, TypingUser,
};
use floe_remote::network::{NetworkMonitor, NetworkProbe};
use floe_remote::{OutboundMessage, RemoteSource};

/// Counters and recorded arguments for every remote call.
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    pub initialize: u32,
    pub join_room: u32,
    pub leave_room: u32,
    pub load_initial: u32,
    pub load_older: u32,
    pub send_message: u32,
    pub set_typing: u32,
    pub pause_all: u32,
    pub cleanup: u32,
    pub initial_requests: Vec<(String, u32)>,
    pub older_requests: Vec<(String, DateTime<Utc>, u32)>,
    pub typing_signals: Vec<(String, bool)>,
}

#[derive(Default)]
struct FakeRemoteState {
    initial_pages: HashMap<String, Vec<Message>>,
    older_pages: HashMap<String, VecDeque<Vec<Message>>>,
    request_failures: VecDeque<SyncError>,
    send_failures: VecDeque<SyncError>,
    fetch_delay: Option<Duration>,
    send_seq: u32,
    calls: CallLog,
}

/// A remote source whose responses are scripted per test: canned pages,
/// injected failures, and optional fetch latency.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeRemoteState>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_initial(&self, room_id: &str, messages: Vec<Message>) {
        self.state
            .lock()
            .unwrap()
            .initial_pages
            .insert(room_id.to_string(), messages);
    }

    /// Queue the next page `load_older_messages` returns for a room.
    pub fn push_older_page(&self, room_id: &str, messages: Vec<Message>) {
        self.state
            .lock()
            .unwrap()
            .older_pages
            .entry(room_id.to_string())
            .or_default()
            .push_back(messages);
    }

    /// Fail the next fetches (initial or older) with the given errors, in
    /// order, before serving scripted pages again.
    pub fn fail_next_requests(&self, errors: impl IntoIterator<Item = SyncError>) {
        self.state.lock().unwrap().request_failures.extend(errors);
    }

    pub fn fail_next_sends(&self, errors: impl IntoIterator<Item = SyncError>) {
        self.state.lock().unwrap().send_failures.extend(errors);
    }

    /// Delay every fetch by `delay` (driven by the paused test clock).
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state.lock().unwrap().fetch_delay = Some(delay);
    }

    pub fn calls(&self) -> CallLog {
        self.state.lock().unwrap().calls.clone()
    }

    async fn apply_fetch_delay(&self) {
        let delay = self.state.lock().unwrap().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn take_request_failure(&self) -> Option<SyncError> {
        self.state.lock().unwrap().request_failures.pop_front()
    }
}

impl RemoteSource for FakeRemote {
    async fn initialize(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();
        state.calls.initialize += 1;
        if let Some(error) = state.request_failures.pop_front() {
            return Err(error);
        }
        Ok(())
    }

    async fn join_room(
        &self,
        _room_id: &str,
        _user_id: &str,
        _display_name: &str,
    ) -> Result<(), SyncError> {
        self.state.lock().unwrap().calls.join_room += 1;
        Ok(())
    }

    async fn leave_room(&self, _room_id: &str) -> Result<(), SyncError> {
        self.state.lock().unwrap().calls.leave_room += 1;
        Ok(())
    }

    async fn load_initial_messages(
        &self,
        room_id: &str,
        limit: u32,
    ) -> Result<Vec<Message>, SyncError> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.load_initial += 1;
            state
                .calls
                .initial_requests
                .push((room_id.to_string(), limit));
        }
        self.apply_fetch_delay().await;

        if let Some(error) = self.take_request_failure() {
            return Err(error);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .initial_pages
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_older_messages(
        &self,
        room_id: &str,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Message>, SyncError> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.load_older += 1;
            state
                .calls
                .older_requests
                .push((room_id.to_string(), before, limit));
        }
        self.apply_fetch_delay().await;

        if let Some(error) = self.take_request_failure() {
            return Err(error);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .older_pages
            .get_mut(room_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }

    async fn send_message(&self, outbound: OutboundMessage) -> Result<Message, SyncError> {
        let mut state = self.state.lock().unwrap();
        state.calls.send_message += 1;
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }
        state.send_seq += 1;
        Ok(Message {
            id: MessageId::Remote(format!("srv-send-{}", state.send_seq)),
            room_id: outbound.room_id,
            sender_id: outbound.sender_id,
            sender_name: outbound.sender_name,
            content: outbound.content,
            timestamp: Utc::now(),
            status: MessageStatus::Sent,
            reply_to: outbound.reply_to,
            reactions: Vec::new(),
        })
    }

    async fn set_typing(
        &self,
        room_id: &str,
        _user_id: &str,
        _display_name: &str,
        is_typing: bool,
    ) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();
        state.calls.set_typing += 1;
        state
            .calls
            .typing_signals
            .push((room_id.to_string(), is_typing));
        Ok(())
    }

    async fn pause_all(&self) -> Result<(), SyncError> {
        self.state.lock().unwrap().calls.pause_all += 1;
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), SyncError> {
        self.state.lock().unwrap().calls.cleanup += 1;
        Ok(())
    }
}

/// A network signal whose probe outcomes are scripted per test.
pub struct FakeNetwork {
    state_tx: watch::Sender<NetworkState>,
    scripted_probes: Mutex<VecDeque<bool>>,
    default_reachable: AtomicBool,
    checks: AtomicU32,
}

impl Default for FakeNetwork {
    fn default() -> Self {
        let (state_tx, _) = watch::channel(NetworkState::online());
        Self {
            state_tx,
            scripted_probes: Mutex::new(VecDeque::new()),
            default_reachable: AtomicBool::new(true),
            checks: AtomicU32::new(0),
        }
    }
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes for the next reliability checks, in order. Once drained,
    /// checks fall back to the default reachability.
    pub fn script_probes(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.scripted_probes.lock().unwrap().extend(outcomes);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.default_reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn report(&self, state: NetworkState) {
        let _ = self.state_tx.send(state);
    }

    pub fn check_count(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

impl NetworkMonitor for FakeNetwork {
    fn watch(&self) -> watch::Receiver<NetworkState> {
        self.state_tx.subscribe()
    }

    async fn check_reliable(&self) -> NetworkProbe {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let reachable = self
            .scripted_probes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_reachable.load(Ordering::SeqCst));

        if reachable {
            NetworkProbe {
                reachable: true,
                latency: Some(Duration::from_millis(20)),
                endpoint: Some("fake://probe".to_string()),
            }
        } else {
            NetworkProbe::unreachable()
        }
    }
}

/// Install a fmt subscriber for tests, once per process. Honors
/// `RUST_LOG`; later calls are no-ops.
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn ts(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

pub fn remote_message(room_id: &str, id: &str, sender: &str, body: &str, at: i64) -> Message {
    Message {
        id: MessageId::Remote(id.into()),
        room_id: room_id.into(),
        sender_id: sender.into(),
        sender_name: sender.to_uppercase(),
        content: MessageContent::text(body),
        timestamp: ts(at),
        status: MessageStatus::Sent,
        reply_to: None,
        reactions: Vec::new(),
    }
}

pub fn local_message(room_id: &str, sender: &str, body: &str, at: i64) -> Message {
    Message {
        id: MessageId::local(),
        room_id: room_id.into(),
        sender_id: sender.into(),
        sender_name: sender.to_uppercase(),
        content: MessageContent::text(body),
        timestamp: ts(at),
        status: MessageStatus::Pending,
        reply_to: None,
        reactions: Vec::new(),
    }
}

pub fn typing_user(room_id: &str, user_id: &str) -> TypingUser {
    TypingUser {
        user_id: user_id.into(),
        room_id: room_id.into(),
        user_name: user_id.to_uppercase(),
        expires_at: Utc::now(),
    }
}

/// A page of `count` ascending messages ending just before `before_ms`,
/// spaced one second apart.
pub fn older_page(room_id: &str, before_ms: i64, count: usize) -> Vec<Message> {
    (0..count)
        .map(|n| {
            let at = before_ms - 1_000 * (count as i64 - n as i64);
            remote_message(
                room_id,
                &format!("hist-{at}"),
                "u-history",
                &format!("older {n}"),
                at,
            )
        })
        .collect()
}
