use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use floe_core::config::ProbeConfig;
use floe_core::model::NetworkState;

/// Outcome of an on-demand reachability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProbe {
    pub reachable: bool,
    /// Round-trip latency of the fastest responding endpoint.
    pub latency: Option<Duration>,
    pub endpoint: Option<String>,
}

impl NetworkProbe {
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            latency: None,
            endpoint: None,
        }
    }
}

/// Platform network signal: a stream of raw connectivity flags plus an
/// on-demand reliable check. The reliable check exists because the raw
/// flags false-positive and false-negative on mobile networks.
pub trait NetworkMonitor: Send + Sync + 'static {
    fn watch(&self) -> watch::Receiver<NetworkState>;

    fn check_reliable(&self) -> impl Future<Output = NetworkProbe> + Send;
}

/// Reachability monitor backed by a multi-endpoint HTTP probe with latency
/// measurement. The platform shell feeds raw flag updates through
/// [`ProbeMonitor::report`].
pub struct ProbeMonitor {
    client: reqwest::Client,
    endpoints: Vec<String>,
    state_tx: watch::Sender<NetworkState>,
}

impl ProbeMonitor {
    pub fn new(config: &ProbeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();
        let (state_tx, _) = watch::channel(NetworkState::online());
        Self {
            client,
            endpoints: config.endpoints.clone(),
            state_tx,
        }
    }

    /// Feed a raw connectivity update from the platform.
    pub fn report(&self, state: NetworkState) {
        let _ = self.state_tx.send(state);
    }
}

impl NetworkMonitor for ProbeMonitor {
    fn watch(&self) -> watch::Receiver<NetworkState> {
        self.state_tx.subscribe()
    }

    async fn check_reliable(&self) -> NetworkProbe {
        let checks = self.endpoints.iter().map(|endpoint| {
            let client = self.client.clone();
            let url = endpoint.clone();
            async move {
                let started = Instant::now();
                match client.get(&url).send().await {
                    Ok(response)
                        if response.status().is_success()
                            || response.status().is_redirection() =>
                    {
                        Some((url, started.elapsed()))
                    }
                    Ok(response) => {
                        debug!(url = %url, status = %response.status(), "probe endpoint rejected");
                        None
                    }
                    Err(error) => {
                        debug!(url = %url, error = %error, "probe endpoint unreachable");
                        None
                    }
                }
            }
        });

        let fastest = futures::future::join_all(checks)
            .await
            .into_iter()
            .flatten()
            .min_by_key(|(_, latency)| *latency);

        match fastest {
            Some((endpoint, latency)) => NetworkProbe {
                reachable: true,
                latency: Some(latency),
                endpoint: Some(endpoint),
            },
            None => NetworkProbe::unreachable(),
        }
    }
}
