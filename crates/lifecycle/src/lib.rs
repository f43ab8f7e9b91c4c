use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use floe_core::config::LifecycleConfig;
use floe_core::error::SyncError;
use floe_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use floe_core::model::{AppPhase, ConnectionStatus};
use floe_remote::network::NetworkMonitor;
use floe_remote::RemoteSource;
use floe_typing::TypingTracker;

pub type ListenerFuture = BoxFuture<'static, Result<(), SyncError>>;

type ListenerCallback = Arc<dyn Fn() -> ListenerFuture + Send + Sync>;

/// Dispatch order for lifecycle listeners. Groups run high → normal → low,
/// sequentially awaited within and across groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ListenerPriority {
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Foreground,
    Background,
}

struct RegisteredListener {
    name: String,
    transition: Transition,
    priority: ListenerPriority,
    callback: ListenerCallback,
}

struct PhaseState {
    current: AppPhase,
    last_accepted_at: Option<Instant>,
    generation: u64,
    recheck: Option<AbortHandle>,
}

/// Binds app foreground/background and connectivity signals to the remote
/// source's subscribe/pause/resume lifecycle.
///
/// The process-wide [`ConnectionStatus`] lives here, behind a watch
/// channel: this coordinator is its only writer. Phase transitions are
/// debounced (a new transition within the debounce window of the last is
/// ignored, and an accepted one waits out a settle delay that a newer
/// transition can supersede) to absorb OS-level flapping between
/// active/inactive/background.
pub struct LifecycleCoordinator<R: RemoteSource, N: NetworkMonitor> {
    remote: Arc<R>,
    network: Arc<N>,
    typing: Arc<TypingTracker>,
    bus: Arc<dyn EventBus>,
    config: LifecycleConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    listeners: Mutex<Vec<RegisteredListener>>,
    phase: Mutex<PhaseState>,
}

impl<R: RemoteSource, N: NetworkMonitor> LifecycleCoordinator<R, N> {
    pub fn new(
        remote: Arc<R>,
        network: Arc<N>,
        typing: Arc<TypingTracker>,
        bus: Arc<dyn EventBus>,
        config: LifecycleConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            remote,
            network,
            typing,
            bus,
            config,
            status_tx,
            listeners: Mutex::new(Vec::new()),
            phase: Mutex::new(PhaseState {
                current: AppPhase::Active,
                last_accepted_at: None,
                generation: 0,
                recheck: None,
            }),
        }
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn current_status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Register a callback fired on the given transition, in priority
    /// order. A failing callback is logged and does not block the rest.
    pub fn add_listener(
        &self,
        name: impl Into<String>,
        transition: Transition,
        priority: ListenerPriority,
        callback: impl Fn() -> ListenerFuture + Send + Sync + 'static,
    ) {
        self.listeners.lock().unwrap().push(RegisteredListener {
            name: name.into(),
            transition,
            priority,
            callback: Arc::new(callback),
        });
    }

    /// Establish the connection. Valid from `disconnected` and `error`; a
    /// no-op while connecting or connected. A retryable failure returns to
    /// `disconnected`, a fatal one parks in `error`.
    pub async fn connect(&self) -> Result<(), SyncError> {
        match self.current_status() {
            ConnectionStatus::Connected | ConnectionStatus::Connecting => return Ok(()),
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {}
        }

        self.set_status(ConnectionStatus::Connecting);
        match self.remote.initialize().await {
            Ok(()) => {
                self.set_status(ConnectionStatus::Connected);
                Ok(())
            }
            Err(error) => {
                let next = if error.is_retryable() {
                    ConnectionStatus::Disconnected
                } else {
                    ConnectionStatus::Error
                };
                warn!(error = %error, ?next, "connection attempt failed");
                self.set_status(next);
                Err(error)
            }
        }
    }

    /// Feed an app-phase transition from the platform shell. Application is
    /// asynchronous: the transition is debounced, settles, and then drives
    /// the background or foreground path on a spawned task.
    pub fn handle_phase(self: &Arc<Self>, phase: AppPhase) {
        let generation = {
            let mut state = self.phase.lock().unwrap();
            if state.current == phase {
                return;
            }
            let now = Instant::now();
            if let Some(last) = state.last_accepted_at {
                if now.duration_since(last) < self.config.transition_debounce() {
                    debug!(?phase, "ignoring rapid phase transition");
                    return;
                }
            }
            state.last_accepted_at = Some(now);
            state.current = phase;
            state.generation += 1;
            state.generation
        };

        self.emit("system.phase.changed", EventPayload::PhaseChanged { phase });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.config.settle_delay()).await;
            if this.phase.lock().unwrap().generation != generation {
                debug!(?phase, "phase transition superseded during settle");
                return;
            }
            match phase {
                AppPhase::Background => this.apply_background().await,
                AppPhase::Active => this.apply_foreground().await,
                AppPhase::Inactive => {}
            }
        });
    }

    /// Watch the raw network signal; losing connectivity while connected
    /// drops the status to `disconnected`.
    pub async fn run(self: Arc<Self>) {
        let mut network = self.network.watch();
        loop {
            if network.changed().await.is_err() {
                debug!("network signal closed, lifecycle coordinator stopping");
                return;
            }
            let state = *network.borrow_and_update();
            self.emit("system.network.changed", EventPayload::NetworkChanged { state });

            if !state.usable() && self.current_status() == ConnectionStatus::Connected {
                debug!("network lost while connected");
                self.set_status(ConnectionStatus::Disconnected);
            }
        }
    }

    async fn apply_background(&self) {
        debug!("entering background: clearing typing, pausing subscriptions");
        self.typing.clear_all();
        if let Err(error) = self.remote.pause_all().await {
            warn!(error = %error, "failed to pause subscriptions");
        }
        self.dispatch(Transition::Background).await;
    }

    async fn apply_foreground(self: &Arc<Self>) {
        self.cancel_recheck();

        let attempts = self.config.network_check_attempts.max(1);
        for attempt in 0..attempts {
            let probe = self.network.check_reliable().await;
            if probe.reachable {
                debug!(attempt, latency = ?probe.latency, "network reachable on foreground");
                self.finish_foreground().await;
                return;
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.config.network_check_delay()).await;
            }
        }

        warn!("network unreachable after retries, scheduling recurring recheck");
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.config.recheck_interval()).await;
                let probe = this.network.check_reliable().await;
                if probe.reachable {
                    debug!("network recovered during recheck");
                    this.phase.lock().unwrap().recheck = None;
                    this.finish_foreground().await;
                    return;
                }
            }
        })
        .abort_handle();
        self.phase.lock().unwrap().recheck = Some(handle);
    }

    async fn finish_foreground(self: &Arc<Self>) {
        if self.current_status() != ConnectionStatus::Connected {
            if let Err(error) = self.connect().await {
                warn!(error = %error, "reconnect on foreground failed");
            }
        }
        self.dispatch(Transition::Foreground).await;
    }

    async fn dispatch(&self, transition: Transition) {
        let mut listeners: Vec<(ListenerPriority, String, ListenerCallback)> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.transition == transition)
            .map(|l| (l.priority, l.name.clone(), Arc::clone(&l.callback)))
            .collect();
        // Stable sort keeps registration order within a priority group.
        listeners.sort_by_key(|(priority, _, _)| *priority);

        for (_, name, callback) in listeners {
            if let Err(error) = callback().await {
                warn!(listener = %name, error = %error, "lifecycle listener failed");
            }
        }
    }

    fn cancel_recheck(&self) {
        if let Some(handle) = self.phase.lock().unwrap().recheck.take() {
            handle.abort();
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            debug!(?status, "connection status changed");
            self.emit(
                "system.connection.changed",
                EventPayload::ConnectionChanged { status },
            );
        }
    }

    fn emit(&self, channel_name: &str, payload: EventPayload) {
        let Ok(channel) = Channel::new(channel_name) else {
            return;
        };
        let event = Event::new(channel, EventSource::System("lifecycle".into()), payload);
        let _ = self.bus.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;

    use floe_core::event::BroadcastEventBus;
    use floe_core::model::NetworkState;
    use floe_test_support::{typing_user, FakeNetwork, FakeRemote};

    struct Harness {
        remote: Arc<FakeRemote>,
        network: Arc<FakeNetwork>,
        typing: Arc<TypingTracker>,
        coordinator: Arc<LifecycleCoordinator<FakeRemote, FakeNetwork>>,
    }

    fn make_harness() -> Harness {
        let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let remote = Arc::new(FakeRemote::new());
        let network = Arc::new(FakeNetwork::new());
        let typing = Arc::new(TypingTracker::new(
            Arc::clone(&bus),
            Duration::from_secs(3),
        ));
        let coordinator = Arc::new(LifecycleCoordinator::new(
            Arc::clone(&remote),
            Arc::clone(&network),
            Arc::clone(&typing),
            bus,
            LifecycleConfig::default(),
        ));
        Harness {
            remote,
            network,
            typing,
            coordinator,
        }
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn counting_listener(counter: Arc<AtomicU32>) -> impl Fn() -> ListenerFuture + Send + Sync {
        move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn connect_reaches_connected() {
        let h = make_harness();
        assert_eq!(h.coordinator.current_status(), ConnectionStatus::Disconnected);

        h.coordinator.connect().await.unwrap();

        assert_eq!(h.coordinator.current_status(), ConnectionStatus::Connected);
        assert_eq!(h.remote.calls().initialize, 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fatal_connect_failure_parks_in_error_until_reconnect() {
        let h = make_harness();
        h.remote
            .fail_next_requests([SyncError::Auth("expired".into())]);

        let result = h.coordinator.connect().await;
        assert_matches!(result, Err(SyncError::Auth(_)));
        assert_eq!(h.coordinator.current_status(), ConnectionStatus::Error);

        // `error` accepts connect() again.
        h.coordinator.connect().await.unwrap();
        assert_eq!(h.coordinator.current_status(), ConnectionStatus::Connected);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn retryable_connect_failure_returns_to_disconnected() {
        let h = make_harness();
        h.remote
            .fail_next_requests([SyncError::Network("reset".into())]);

        let result = h.coordinator.connect().await;
        assert_matches!(result, Err(SyncError::Network(_)));
        assert_eq!(h.coordinator.current_status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn background_clears_typing_pauses_and_fires_listeners() {
        let h = make_harness();
        let background_fired = Arc::new(AtomicU32::new(0));
        h.coordinator.add_listener(
            "persist-state",
            Transition::Background,
            ListenerPriority::Normal,
            counting_listener(Arc::clone(&background_fired)),
        );
        h.typing.on_typing(typing_user("general", "u1"));

        h.coordinator.handle_phase(AppPhase::Background);
        advance(Duration::from_millis(600)).await;

        assert!(h.typing.typists("general").is_empty());
        assert_eq!(h.remote.calls().pause_all, 1);
        assert_eq!(background_fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn transition_within_debounce_window_is_ignored() {
        let h = make_harness();
        let foreground_fired = Arc::new(AtomicU32::new(0));
        h.coordinator.add_listener(
            "resubscribe",
            Transition::Foreground,
            ListenerPriority::Normal,
            counting_listener(Arc::clone(&foreground_fired)),
        );

        h.coordinator.handle_phase(AppPhase::Background);
        advance(Duration::from_millis(100)).await;
        // Within the 300ms window of the accepted transition: dropped.
        h.coordinator.handle_phase(AppPhase::Active);
        advance(Duration::from_secs(2)).await;

        assert_eq!(h.remote.calls().pause_all, 1);
        assert_eq!(foreground_fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn newer_transition_supersedes_unsettled_one() {
        let h = make_harness();
        let foreground_fired = Arc::new(AtomicU32::new(0));
        h.coordinator.add_listener(
            "resubscribe",
            Transition::Foreground,
            ListenerPriority::Normal,
            counting_listener(Arc::clone(&foreground_fired)),
        );

        h.coordinator.handle_phase(AppPhase::Background);
        // Past the debounce window but inside the settle delay: the
        // background application is superseded before it runs.
        advance(Duration::from_millis(350)).await;
        h.coordinator.handle_phase(AppPhase::Active);
        advance(Duration::from_secs(2)).await;

        assert_eq!(h.remote.calls().pause_all, 0);
        assert_eq!(foreground_fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn foreground_fires_listeners_once_in_priority_order() {
        let h = make_harness();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [
            ("low", ListenerPriority::Low),
            ("high", ListenerPriority::High),
            ("normal", ListenerPriority::Normal),
        ] {
            let order = Arc::clone(&order);
            h.coordinator
                .add_listener(name, Transition::Foreground, priority, move || {
                    let order = Arc::clone(&order);
                    Box::pin(async move {
                        order.lock().unwrap().push(name);
                        Ok(())
                    })
                });
        }

        h.coordinator.handle_phase(AppPhase::Background);
        advance(Duration::from_millis(600)).await;
        h.coordinator.handle_phase(AppPhase::Active);
        advance(Duration::from_secs(2)).await;

        assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
        assert_eq!(h.coordinator.current_status(), ConnectionStatus::Connected);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn unreachable_network_schedules_recheck_until_recovery() {
        let h = make_harness();
        let foreground_fired = Arc::new(AtomicU32::new(0));
        h.coordinator.add_listener(
            "resubscribe",
            Transition::Foreground,
            ListenerPriority::High,
            counting_listener(Arc::clone(&foreground_fired)),
        );

        h.coordinator.handle_phase(AppPhase::Background);
        advance(Duration::from_millis(600)).await;

        // Three fixed-delay attempts fail, then one 5s recheck fails, then
        // the network recovers.
        h.network.script_probes([false, false, false, false, true]);
        h.coordinator.handle_phase(AppPhase::Active);
        advance(Duration::from_millis(600)).await;
        advance(Duration::from_secs(1)).await;
        advance(Duration::from_secs(1)).await;
        assert_eq!(h.network.check_count(), 3);
        assert_eq!(foreground_fired.load(Ordering::SeqCst), 0);

        advance(Duration::from_secs(5)).await;
        assert_eq!(h.network.check_count(), 4);
        assert_eq!(foreground_fired.load(Ordering::SeqCst), 0);

        advance(Duration::from_secs(5)).await;
        assert_eq!(h.network.check_count(), 5);
        assert_eq!(foreground_fired.load(Ordering::SeqCst), 1);
        assert_eq!(h.coordinator.current_status(), ConnectionStatus::Connected);
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn failing_listener_does_not_block_later_ones() {
        let h = make_harness();
        let survivor_fired = Arc::new(AtomicU32::new(0));

        h.coordinator.add_listener(
            "doomed",
            Transition::Background,
            ListenerPriority::High,
            || Box::pin(async { Err(SyncError::Network("boom".into())) }),
        );
        h.coordinator.add_listener(
            "survivor",
            Transition::Background,
            ListenerPriority::Low,
            counting_listener(Arc::clone(&survivor_fired)),
        );

        h.coordinator.handle_phase(AppPhase::Background);
        advance(Duration::from_millis(600)).await;

        assert_eq!(survivor_fired.load(Ordering::SeqCst), 1);
        assert!(logs_contain("lifecycle listener failed"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn losing_network_while_connected_disconnects() {
        let h = make_harness();
        h.coordinator.connect().await.unwrap();

        let run_handle = tokio::spawn(Arc::clone(&h.coordinator).run());
        tokio::task::yield_now().await;

        h.network.report(NetworkState::offline());
        advance(Duration::from_millis(10)).await;

        assert_eq!(
            h.coordinator.current_status(),
            ConnectionStatus::Disconnected
        );
        run_handle.abort();
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn inactive_phase_applies_neither_path() {
        let h = make_harness();
        let fired = Arc::new(AtomicU32::new(0));
        h.coordinator.add_listener(
            "any",
            Transition::Background,
            ListenerPriority::Normal,
            counting_listener(Arc::clone(&fired)),
        );

        h.coordinator.handle_phase(AppPhase::Inactive);
        advance(Duration::from_secs(2)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(h.remote.calls().pause_all, 0);
    }
}
