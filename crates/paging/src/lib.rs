use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, trace, warn};

use floe_core::config::PaginationConfig;
use floe_core::error::SyncError;
use floe_core::model::{Delivery, DeviceClass, Message};
use floe_core::retry::{with_fetch_timeout, RetryPolicy};
use floe_remote::RemoteSource;
use floe_store::MessageStore;

mod batch;

pub use batch::batch_size;

/// Per-room backward paging state. Created on first load, destroyed when
/// the room is left.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationState {
    /// Exclusive upper bound for the next backward page.
    pub cursor: Option<DateTime<Utc>>,
    pub has_more: bool,
    pub loaded_count: usize,
    pub last_load_time: Option<DateTime<Utc>>,
}

impl PaginationState {
    fn new() -> Self {
        Self {
            cursor: None,
            has_more: true,
            loaded_count: 0,
            last_load_time: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FetchKind {
    Initial,
    Older(DateTime<Utc>),
}

type SharedFetch = Shared<BoxFuture<'static, Result<Vec<Message>, SyncError>>>;

/// Loads history backward through the remote source and backfills the
/// message store.
///
/// At most one fetch is in flight per room: concurrent callers share the
/// same future rather than issuing duplicates, and the shared future alone
/// applies the page's side effects (state update + store merge), so a
/// coalesced result is never double-counted.
pub struct PaginationManager<R: RemoteSource> {
    remote: Arc<R>,
    store: Arc<MessageStore>,
    retry: RetryPolicy,
    device: DeviceClass,
    preload_threshold: f32,
    preload_fraction: f32,
    states: RwLock<HashMap<String, PaginationState>>,
    inflight: Mutex<HashMap<String, SharedFetch>>,
}

impl<R: RemoteSource> PaginationManager<R> {
    pub fn new(
        remote: Arc<R>,
        store: Arc<MessageStore>,
        retry: RetryPolicy,
        device: DeviceClass,
        config: &PaginationConfig,
    ) -> Self {
        Self {
            remote,
            store,
            retry,
            device,
            preload_threshold: config.preload_threshold,
            preload_fraction: config.preload_fraction,
            states: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Load the next page for a room: the initial window on first call,
    /// then pages going backward from the cursor. Returns the fetched
    /// messages; the store is backfilled as a side effect.
    pub async fn load_next_batch(
        self: &Arc<Self>,
        room_id: &str,
        explicit_size: Option<u32>,
    ) -> Result<Vec<Message>, SyncError> {
        let state = self.state(room_id);
        if let Some(state) = &state {
            if !state.has_more {
                trace!(room = %room_id, "history exhausted, skipping fetch");
                return Ok(Vec::new());
            }
        }

        let loaded = state.as_ref().map_or(0, |s| s.loaded_count);
        let size = explicit_size.unwrap_or_else(|| batch_size(loaded, self.device));
        let kind = match state.and_then(|s| s.cursor) {
            None => FetchKind::Initial,
            Some(cursor) => FetchKind::Older(cursor),
        };

        self.shared_fetch(room_id, size, kind).await
    }

    /// Backward history fetch anchored at the currently-oldest loaded
    /// message. A room with nothing cached is a no-op.
    pub async fn load_older(self: &Arc<Self>, room_id: &str) -> Result<Vec<Message>, SyncError> {
        let Some(oldest) = self.store.oldest_timestamp(room_id) else {
            debug!(room = %room_id, "no cached messages, nothing to page from");
            return Ok(Vec::new());
        };

        let loaded = match self.state(room_id) {
            Some(state) if !state.has_more => {
                trace!(room = %room_id, "history exhausted, skipping fetch");
                return Ok(Vec::new());
            }
            Some(state) => state.loaded_count,
            None => 0,
        };

        let size = batch_size(loaded, self.device);
        self.shared_fetch(room_id, size, FetchKind::Older(oldest)).await
    }

    /// Scroll-position hook: crossing the preload threshold toward the
    /// oldest loaded message triggers a speculative background fetch of a
    /// reduced page. Preload failures are logged, never surfaced.
    pub fn on_scroll(self: &Arc<Self>, room_id: &str, ratio: f32) {
        if ratio < self.preload_threshold {
            return;
        }
        if let Some(state) = self.state(room_id) {
            if !state.has_more {
                return;
            }
        }
        if self.inflight.lock().unwrap().contains_key(room_id) {
            return;
        }
        let Some(oldest) = self.store.oldest_timestamp(room_id) else {
            return;
        };

        let loaded = self.state(room_id).map_or(0, |s| s.loaded_count);
        let full = batch_size(loaded, self.device) as f32;
        let size = (full * self.preload_fraction).round().max(1.0) as u32;

        debug!(room = %room_id, size, "scroll threshold crossed, preloading history");
        let shared = self.shared_fetch(room_id, size, FetchKind::Older(oldest));
        let room = room_id.to_string();
        tokio::spawn(async move {
            if let Err(error) = shared.await {
                debug!(room = %room, error = %error, "speculative preload failed");
            }
        });
    }

    pub fn state(&self, room_id: &str) -> Option<PaginationState> {
        self.states.read().unwrap().get(room_id).cloned()
    }

    /// Drop all paging state for a room (room left).
    pub fn remove_room(&self, room_id: &str) {
        self.states.write().unwrap().remove(room_id);
        self.inflight.lock().unwrap().remove(room_id);
    }

    fn shared_fetch(self: &Arc<Self>, room_id: &str, size: u32, kind: FetchKind) -> SharedFetch {
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(existing) = inflight.get(room_id) {
            trace!(room = %room_id, "joining in-flight fetch");
            return existing.clone();
        }

        let this = Arc::clone(self);
        let room = room_id.to_string();
        let fetch: SharedFetch = async move {
            let result = this.run_fetch(&room, size, kind).await;
            this.inflight.lock().unwrap().remove(&room);
            match result {
                Ok(messages) => {
                    this.apply_page(&room, size, &messages, matches!(kind, FetchKind::Initial));
                    Ok(messages)
                }
                Err(error) => {
                    warn!(room = %room, error = %error, "history fetch failed");
                    Err(error)
                }
            }
        }
        .boxed()
        .shared();

        inflight.insert(room_id.to_string(), fetch.clone());
        fetch
    }

    async fn run_fetch(
        &self,
        room_id: &str,
        size: u32,
        kind: FetchKind,
    ) -> Result<Vec<Message>, SyncError> {
        let remote = Arc::clone(&self.remote);
        let room = room_id.to_string();
        self.retry
            .run(move || {
                let remote = Arc::clone(&remote);
                let room = room.clone();
                async move {
                    with_fetch_timeout(async move {
                        match kind {
                            FetchKind::Initial => remote.load_initial_messages(&room, size).await,
                            FetchKind::Older(before) => {
                                remote.load_older_messages(&room, before, size).await
                            }
                        }
                    })
                    .await
                }
            })
            .await
    }

    fn apply_page(&self, room_id: &str, requested: u32, messages: &[Message], initial: bool) {
        {
            let mut states = self.states.write().unwrap();
            let state = states
                .entry(room_id.to_string())
                .or_insert_with(PaginationState::new);
            state.loaded_count += messages.len();
            state.has_more = !messages.is_empty() && messages.len() as u32 >= requested;
            if let Some(oldest) = messages.first().map(|m| m.timestamp) {
                state.cursor = Some(match state.cursor {
                    Some(cursor) => cursor.min(oldest),
                    None => oldest,
                });
            }
            state.last_load_time = Some(Utc::now());
        }

        debug!(
            room = %room_id,
            count = messages.len(),
            requested,
            initial,
            "applied history page"
        );
        let deliveries = messages.iter().cloned().map(Delivery::plain).collect();
        self.store.merge(room_id, deliveries, initial);
    }
}
