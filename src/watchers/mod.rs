//! Multi-chain event watcher
//!
//! Each active chain gets a live subscription plus a recurring historical
//! sweep. Both feed the single [`Ingestor`], so a transfer seen by both paths
//! still lands as one row.

use eyre::WrapErr;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::chains::ChainRegistry;
use crate::client::ChainConnections;
use crate::config::WatcherConfig;
use crate::metrics;
use crate::notify::Notifier;
use crate::scheduler::Scheduler;
use crate::store::EventStore;

pub mod ingest;
pub mod live;
pub mod sweep;

pub use ingest::{IngestError, IngestOutcome, Ingestor, Observation, ObservationSource};
pub use live::LiveSubscription;
pub use sweep::SweepReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    pub running: bool,
    pub active_chains: BTreeSet<u64>,
    pub subscription_count: usize,
}

#[derive(Default)]
struct WatcherState {
    running: bool,
    subscriptions: BTreeMap<u64, LiveSubscription>,
    scheduler: Option<Scheduler>,
}

pub struct EventWatcher {
    registry: Arc<ChainRegistry>,
    connections: ChainConnections,
    ingestor: Arc<Ingestor>,
    config: WatcherConfig,
    state: Mutex<WatcherState>,
}

impl EventWatcher {
    /// Connect read-only to every registered chain
    pub fn initialize(
        registry: Arc<ChainRegistry>,
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn Notifier>,
        config: WatcherConfig,
    ) -> Self {
        let connections = ChainConnections::connect_read_only(&registry);
        Self::with_connections(registry, connections, store, notifier, config)
    }

    pub fn with_connections(
        registry: Arc<ChainRegistry>,
        connections: ChainConnections,
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn Notifier>,
        config: WatcherConfig,
    ) -> Self {
        let ingestor = Arc::new(Ingestor::new(store, connections.clone(), notifier));
        info!(chains = ?connections.chain_ids(), "Event watcher initialized");
        Self {
            registry,
            connections,
            ingestor,
            config,
            state: Mutex::new(WatcherState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, WatcherState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Chains with both a descriptor and a live connection
    fn active_chain_ids(&self) -> BTreeSet<u64> {
        self.connections
            .chain_ids()
            .into_iter()
            .filter(|id| self.registry.describe(*id).is_ok())
            .collect()
    }

    /// Start live subscriptions and sweeps. A second call is a no-op.
    pub fn start(&self) {
        let mut state = self.state();
        if state.running {
            return;
        }

        let mut scheduler = Scheduler::new();
        for chain_id in self.active_chain_ids() {
            let (Ok(descriptor), Some(client)) =
                (self.registry.describe(chain_id), self.connections.get(chain_id))
            else {
                continue;
            };

            let subscription = live::subscribe(
                client.clone(),
                self.ingestor.clone(),
                descriptor.block_time,
                self.config.max_block_range,
            );
            state.subscriptions.insert(chain_id, subscription);

            let ingestor = self.ingestor.clone();
            let client = client.clone();
            let descriptor = descriptor.clone();
            let config = self.config;
            scheduler.every(
                format!("sweep:{}", chain_id),
                config.sweep_interval(),
                true,
                move || {
                    let ingestor = ingestor.clone();
                    let client = client.clone();
                    let descriptor = descriptor.clone();
                    async move {
                        sweep::sweep_chain(&ingestor, client.as_ref(), &descriptor, &config)
                            .await
                            .map(|_| ())
                            .map_err(|e| {
                                metrics::record_error(descriptor.chain_id, "sweep");
                                e
                            })
                            .wrap_err_with(|| {
                                format!("Sweep of chain {} failed", descriptor.chain_id)
                            })
                    }
                },
            );
        }

        info!(
            chains = state.subscriptions.len(),
            sweep_interval_ms = self.config.sweep_interval_ms,
            "Event watcher started"
        );
        state.scheduler = Some(scheduler);
        state.running = true;
    }

    /// Stop subscriptions and future sweeps; a sweep already running finishes
    pub async fn stop(&self) {
        let scheduler = {
            let mut state = self.state();
            if !state.running {
                return;
            }
            state.running = false;
            for (_, subscription) in std::mem::take(&mut state.subscriptions) {
                subscription.unsubscribe();
            }
            state.scheduler.take()
        };

        if let Some(mut scheduler) = scheduler {
            scheduler.stop();
            scheduler.join().await;
        }
        info!("Event watcher stopped");
    }

    pub fn status(&self) -> WatcherStatus {
        let state = self.state();
        WatcherStatus {
            running: state.running,
            active_chains: self.active_chain_ids(),
            subscription_count: state.subscriptions.len(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Run one sweep of `chain_id` outside the schedule
    pub async fn sweep_chain(&self, chain_id: u64) -> Result<SweepReport, IngestError> {
        let client = self
            .connections
            .get(chain_id)
            .ok_or(IngestError::NoConnection(chain_id))?;
        let descriptor = match self.registry.describe(chain_id) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(chain_id, error = %e, "Sweep requested for unregistered chain");
                return Err(IngestError::NoConnection(chain_id));
            }
        };
        sweep::sweep_chain(&self.ingestor, client.as_ref(), descriptor, &self.config).await
    }
}
