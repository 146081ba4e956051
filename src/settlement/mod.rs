//! Settlement Processor
//!
//! Polls the store for events awaiting settlement, gates them on the target
//! chain's confirmation threshold and gas ceiling, then submits
//! `releaseTokens(txId)` on the target chain. The processor is the only writer
//! of status transitions.

pub mod retry;

use alloy::primitives::utils::format_ether;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use eyre::{Result, WrapErr};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chains::ChainRegistry;
use crate::client::{ChainConnections, ChainError};
use crate::config::ProcessorConfig;
use crate::metrics;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::scheduler::Scheduler;
use crate::store::{EventStore, StoreError};
use crate::types::{format_address, BridgeEvent, EventStatus};

pub use retry::{classify_error, ErrorClass};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("chain {0} is not configured")]
    UnknownChain(u64),
    #[error("failed to read target chain state: {0}")]
    Read(ChainError),
    #[error("settlement failed: {0}")]
    Release(ChainError),
}

/// What happened to one event in a processing cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    AwaitingConfirmations { have: u64, need: u64 },
    /// Deliberate skip, retried next cycle
    GasPriceTooHigh { gas_price: u128, ceiling: u128 },
    Completed { tx_hash: String },
    Failed { reason: String },
    /// Transient failure; status left unchanged
    RetryLater { reason: String },
    /// No signing connection for the target chain
    TargetUnavailable,
    StoreUnavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    pub deferred: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBalance {
    pub name: String,
    /// Whole native tokens
    pub balance: String,
    pub balance_wei: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStatus {
    pub running: bool,
    pub relayer_address: String,
    pub connected_chains: Vec<u64>,
}

/// Result of the startup authorization check on one chain. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    Unauthorized,
    /// The contract could not be read
    Unknown(String),
}

pub struct SettlementProcessor {
    registry: Arc<ChainRegistry>,
    connections: ChainConnections,
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn Notifier>,
    relayer_address: Address,
    config: ProcessorConfig,
    scheduler: Mutex<Option<Scheduler>>,
}

impl SettlementProcessor {
    /// Derive the signing identity, connect to every registered chain and
    /// check (best effort) that the relayer is authorized on each.
    pub async fn initialize(
        registry: Arc<ChainRegistry>,
        private_key: &str,
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn Notifier>,
        config: ProcessorConfig,
    ) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .wrap_err("Invalid relayer private key")?;
        let relayer_address = signer.address();
        info!(relayer_address = %relayer_address, "Relayer identity loaded");

        let connections = ChainConnections::connect_signing(&registry, &signer);
        let processor = Self::with_connections(
            registry,
            connections,
            store,
            notifier,
            relayer_address,
            config,
        );
        processor.check_authorization().await;
        Ok(processor)
    }

    pub fn with_connections(
        registry: Arc<ChainRegistry>,
        connections: ChainConnections,
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn Notifier>,
        relayer_address: Address,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            registry,
            connections,
            store,
            notifier,
            relayer_address,
            config,
            scheduler: Mutex::new(None),
        }
    }

    fn scheduler(&self) -> MutexGuard<'_, Option<Scheduler>> {
        self.scheduler.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn relayer_address(&self) -> Address {
        self.relayer_address
    }

    /// Log whether the relayer is registered on each chain. Never fails.
    pub async fn check_authorization(&self) -> BTreeMap<u64, Authorization> {
        let mut results = BTreeMap::new();
        for (chain_id, client) in self.connections.iter() {
            let result = match client.is_relayer_authorized(self.relayer_address).await {
                Ok(true) => {
                    info!(chain_id, relayer = %self.relayer_address, "Relayer authorized");
                    Authorization::Authorized
                }
                Ok(false) => {
                    warn!(
                        chain_id,
                        relayer = %self.relayer_address,
                        "Relayer is NOT authorized on this chain; settlements will revert"
                    );
                    metrics::record_error(chain_id, "unauthorized");
                    Authorization::Unauthorized
                }
                Err(e) => {
                    warn!(chain_id, error = %e, "Could not check relayer authorization");
                    metrics::record_error(chain_id, "authorization_check");
                    Authorization::Unknown(e.to_string())
                }
            };
            results.insert(chain_id, result);
        }
        results
    }

    /// Run the settlement cycle immediately and then every processing interval
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.scheduler();
        if slot.is_some() {
            return;
        }

        let mut scheduler = Scheduler::new();
        let processor = Arc::clone(self);
        scheduler.every(
            "settlement",
            self.config.processing_interval(),
            true,
            move || {
                let processor = processor.clone();
                async move {
                    processor
                        .process_pending()
                        .await
                        .map(|_| ())
                        .wrap_err("Settlement cycle failed")
                }
            },
        );
        *slot = Some(scheduler);

        info!(
            processing_interval_ms = self.config.processing_interval_ms,
            chains = ?self.connections.chain_ids(),
            "Settlement processor started"
        );
    }

    /// Cancel future cycles. A cycle already running is not interrupted.
    pub async fn stop(&self) {
        let scheduler = self.scheduler().take();
        if let Some(mut scheduler) = scheduler {
            scheduler.stop();
            scheduler.join().await;
            info!("Settlement processor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler().is_some()
    }

    pub fn status(&self) -> ProcessorStatus {
        ProcessorStatus {
            running: self.is_running(),
            relayer_address: format_address(&self.relayer_address),
            connected_chains: self.connections.chain_ids(),
        }
    }

    /// One processing cycle: every pending or confirmed event, oldest first,
    /// with `submission_delay` between events.
    pub async fn process_pending(&self) -> std::result::Result<CycleReport, StoreError> {
        let events = self.store.pending_for_settlement().await?;
        metrics::set_pending_events(events.len());

        let mut report = CycleReport::default();
        if events.is_empty() {
            return Ok(report);
        }
        debug!(count = events.len(), "Processing pending settlements");

        for (i, event) in events.iter().enumerate() {
            if i > 0 && !self.config.submission_delay().is_zero() {
                tokio::time::sleep(self.config.submission_delay()).await;
            }

            report.examined += 1;
            match self.process_event(event).await {
                SettlementOutcome::Completed { .. } => report.completed += 1,
                SettlementOutcome::Failed { .. } => report.failed += 1,
                _ => report.deferred += 1,
            }
        }

        info!(
            examined = report.examined,
            completed = report.completed,
            failed = report.failed,
            deferred = report.deferred,
            "Settlement cycle complete"
        );
        Ok(report)
    }

    /// Advance one event as far as it can go this cycle
    pub async fn process_event(&self, event: &BridgeEvent) -> SettlementOutcome {
        match self.settle(event).await {
            Ok(outcome) => outcome,
            Err(SettlementError::Store(e)) => {
                error!(tx_id = %event.tx_id, error = %e, "Store error while settling");
                metrics::record_error(event.target_chain, "store");
                SettlementOutcome::StoreUnavailable
            }
            Err(SettlementError::Read(e)) => {
                warn!(
                    tx_id = %event.tx_id,
                    target_chain = event.target_chain,
                    error = %e,
                    "Failed to read target chain, will retry"
                );
                metrics::record_error(event.target_chain, "rpc");
                SettlementOutcome::RetryLater {
                    reason: e.public_message(),
                }
            }
            Err(SettlementError::Release(e)) if e.is_retryable() => {
                warn!(
                    tx_id = %event.tx_id,
                    target_chain = event.target_chain,
                    error = %e,
                    class = ?e.class(),
                    "Settlement failed with a retryable error, will retry"
                );
                metrics::record_settlement(event.target_chain, "retry");
                SettlementOutcome::RetryLater {
                    reason: e.public_message(),
                }
            }
            Err(SettlementError::Release(e)) => {
                let reason = e.public_message();
                self.fail(event, &reason, NotificationKind::SettlementFailure)
                    .await
            }
            Err(e @ SettlementError::UnknownChain(_)) => {
                let reason = e.to_string();
                self.fail(event, &reason, NotificationKind::ProcessingError)
                    .await
            }
        }
    }

    async fn settle(&self, event: &BridgeEvent) -> std::result::Result<SettlementOutcome, SettlementError> {
        let tx_id = event.tx_id;
        let target = self
            .registry
            .describe(event.target_chain)
            .map_err(|_| SettlementError::UnknownChain(event.target_chain))?;

        let confirmations = self.refresh_confirmations(event).await?;
        if confirmations < target.min_confirmations {
            debug!(
                tx_id = %tx_id,
                confirmations,
                required = target.min_confirmations,
                "Waiting for confirmations"
            );
            return Ok(SettlementOutcome::AwaitingConfirmations {
                have: confirmations,
                need: target.min_confirmations,
            });
        }

        if event.status == EventStatus::Pending {
            self.store
                .set_status(tx_id, EventStatus::Confirmed, None, None)
                .await?;
            info!(tx_id = %tx_id, confirmations, "Event confirmed");
        }

        let Some(client) = self.connections.get(event.target_chain) else {
            warn!(
                tx_id = %tx_id,
                target_chain = event.target_chain,
                "No signing connection for target chain"
            );
            return Ok(SettlementOutcome::TargetUnavailable);
        };

        let gas_price = client.gas_price().await.map_err(SettlementError::Read)?;
        if gas_price > target.max_gas_price_wei {
            warn!(
                tx_id = %tx_id,
                target_chain = event.target_chain,
                gas_price,
                ceiling = target.max_gas_price_wei,
                "Gas price above ceiling, skipping"
            );
            metrics::record_settlement(event.target_chain, "gas_too_high");
            return Ok(SettlementOutcome::GasPriceTooHigh {
                gas_price,
                ceiling: target.max_gas_price_wei,
            });
        }

        info!(
            tx_id = %tx_id,
            source_chain = event.source_chain,
            target_chain = event.target_chain,
            gas_price,
            gas_limit = target.gas_limit,
            "Submitting releaseTokens"
        );
        let started = Instant::now();
        let receipt = client
            .release_tokens(tx_id, target.gas_limit, gas_price)
            .await
            .map_err(SettlementError::Release)?;
        metrics::record_settlement_latency(event.target_chain, started.elapsed().as_secs_f64());

        let tx_hash = format!("{:?}", receipt.tx_hash);
        self.store
            .set_status(tx_id, EventStatus::Completed, Some(&tx_hash), None)
            .await?;
        metrics::record_settlement(event.target_chain, "completed");
        info!(tx_id = %tx_id, settlement_tx = %tx_hash, "Settlement completed");

        self.notifier.notify(
            Notification::for_event(
                NotificationKind::SettlementSuccess,
                format!(
                    "Released tokens on chain {} for transfer from chain {}",
                    event.target_chain, event.source_chain
                ),
                event,
            )
            .with_field("settlementTxHash", tx_hash.clone()),
        );

        Ok(SettlementOutcome::Completed { tx_hash })
    }

    /// Re-read the source head and persist the new depth. A failed read falls
    /// back to the stored count.
    async fn refresh_confirmations(&self, event: &BridgeEvent) -> std::result::Result<u64, StoreError> {
        let Some(source) = self.connections.get(event.source_chain) else {
            return Ok(event.confirmations);
        };

        match source.block_number().await {
            Ok(head) => {
                let confirmations = head.saturating_sub(event.block_number);
                if confirmations > event.confirmations {
                    self.store
                        .set_confirmations(event.tx_id, confirmations)
                        .await?;
                }
                Ok(confirmations.max(event.confirmations))
            }
            Err(e) => {
                debug!(
                    tx_id = %event.tx_id,
                    source_chain = event.source_chain,
                    error = %e,
                    "Could not refresh confirmations, using stored count"
                );
                Ok(event.confirmations)
            }
        }
    }

    async fn fail(
        &self,
        event: &BridgeEvent,
        reason: &str,
        kind: NotificationKind,
    ) -> SettlementOutcome {
        error!(
            tx_id = %event.tx_id,
            target_chain = event.target_chain,
            reason,
            "Settlement failed"
        );
        metrics::record_settlement(event.target_chain, "failed");

        if let Err(e) = self
            .store
            .set_status(event.tx_id, EventStatus::Failed, None, Some(reason))
            .await
        {
            error!(tx_id = %event.tx_id, error = %e, "Failed to record settlement failure");
            return SettlementOutcome::StoreUnavailable;
        }

        self.notifier.notify(
            Notification::for_event(
                kind,
                format!("Settlement of transfer to chain {} failed", event.target_chain),
                event,
            )
            .with_field("error", reason),
        );

        SettlementOutcome::Failed {
            reason: reason.to_string(),
        }
    }

    /// Relayer native balance on every connected chain. Chains whose balance
    /// cannot be read are left out.
    pub async fn all_balances(&self) -> BTreeMap<u64, ChainBalance> {
        let mut balances = BTreeMap::new();
        for (chain_id, client) in self.connections.iter() {
            let name = self
                .registry
                .describe(chain_id)
                .map(|d| d.name.clone())
                .unwrap_or_else(|_| chain_id.to_string());

            match client.balance(self.relayer_address).await {
                Ok(wei) => {
                    balances.insert(
                        chain_id,
                        ChainBalance {
                            name,
                            balance: format_ether(wei),
                            balance_wei: wei.to_string(),
                        },
                    );
                }
                Err(e) => {
                    warn!(chain_id, error = %e, "Failed to read relayer balance");
                    metrics::record_error(chain_id, "balance");
                }
            }
        }
        balances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::chains::ChainDescriptor;
    use crate::testing::{descriptor, tx_id, FakeChain, RecordingNotifier};
    use crate::types::NewBridgeEvent;
    use alloy::primitives::{B256, U256};

    struct Harness {
        processor: SettlementProcessor,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        source: Arc<FakeChain>,
        target: Arc<FakeChain>,
    }

    fn harness(target_min_confirmations: u64) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let source = Arc::new(FakeChain::new(1));
        let target = Arc::new(FakeChain::new(56));
        let registry = ChainRegistry::from_descriptors([
            descriptor(1, 12),
            descriptor(56, target_min_confirmations),
        ]);
        let mut connections = ChainConnections::new();
        connections.insert(source.clone());
        connections.insert(target.clone());

        let processor = SettlementProcessor::with_connections(
            Arc::new(registry),
            connections,
            store.clone(),
            notifier.clone(),
            Address::repeat_byte(0x11),
            ProcessorConfig {
                processing_interval_ms: 30_000,
                submission_delay_ms: 0,
            },
        );
        Harness {
            processor,
            store,
            notifier,
            source,
            target,
        }
    }

    fn new_event(id: &str, block_number: u64, confirmations: u64) -> NewBridgeEvent {
        NewBridgeEvent {
            tx_id: tx_id(id),
            kind: crate::types::EventKind::Locked,
            source_chain: 1,
            target_chain: 56,
            user_address: Address::repeat_byte(0xaa),
            token_address: Address::repeat_byte(0xbb),
            amount: U256::from(10u64),
            target_address: Address::repeat_byte(0xcc),
            block_number,
            transaction_hash: B256::repeat_byte(0x01),
            confirmations,
        }
    }

    async fn stored(h: &Harness, id: &str) -> BridgeEvent {
        h.store.get_event(tx_id(id)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_below_threshold_waits() {
        let h = harness(5);
        h.source.set_head(102);
        h.store.upsert_event(&new_event("0x1", 100, 0)).await.unwrap();

        let event = stored(&h, "0x1").await;
        assert_eq!(
            h.processor.process_event(&event).await,
            SettlementOutcome::AwaitingConfirmations { have: 2, need: 5 }
        );
        let event = stored(&h, "0x1").await;
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.confirmations, 2);
        assert!(h.target.releases().is_empty());
    }

    #[tokio::test]
    async fn test_source_read_failure_uses_stored_confirmations() {
        let h = harness(5);
        h.source.fail_next_block_number(ChainError::Transport("down".into()));
        h.store.upsert_event(&new_event("0x1", 100, 7)).await.unwrap();

        let event = stored(&h, "0x1").await;
        assert!(matches!(
            h.processor.process_event(&event).await,
            SettlementOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_retryable_release_error_leaves_status() {
        let h = harness(1);
        h.source.set_head(200);
        h.store.upsert_event(&new_event("0x1", 100, 0)).await.unwrap();
        h.target.push_release_result(Err(ChainError::Rpc {
            code: None,
            message: "nonce too low".into(),
        }));

        let event = stored(&h, "0x1").await;
        assert!(matches!(
            h.processor.process_event(&event).await,
            SettlementOutcome::RetryLater { .. }
        ));
        let event = stored(&h, "0x1").await;
        assert_eq!(event.status, EventStatus::Confirmed);
        assert!(event.error_message.is_none());
        assert_eq!(h.notifier.count(NotificationKind::SettlementFailure), 0);
    }

    #[tokio::test]
    async fn test_revert_fails_event_with_readable_message() {
        let h = harness(1);
        h.source.set_head(200);
        h.store.upsert_event(&new_event("0x1", 100, 0)).await.unwrap();
        h.target.push_release_result(Err(ChainError::Contract(
            "execution reverted: Transaction already processed".into(),
        )));

        let event = stored(&h, "0x1").await;
        h.processor.process_event(&event).await;

        let event = stored(&h, "0x1").await;
        assert_eq!(event.status, EventStatus::Failed);
        assert_eq!(
            event.error_message.as_deref(),
            Some("execution reverted: Transaction already processed")
        );
        assert_eq!(h.notifier.count(NotificationKind::SettlementFailure), 1);
    }

    #[tokio::test]
    async fn test_unknown_target_chain_fails_event() {
        let h = harness(1);
        let mut event = new_event("0x9", 100, 50);
        event.target_chain = 9999;
        h.store.upsert_event(&event).await.unwrap();

        let stored_event = stored(&h, "0x9").await;
        assert!(matches!(
            h.processor.process_event(&stored_event).await,
            SettlementOutcome::Failed { .. }
        ));
        assert_eq!(h.notifier.count(NotificationKind::ProcessingError), 1);
    }

    #[tokio::test]
    async fn test_gas_read_failure_retries_without_failing() {
        let h = harness(0);
        h.store.upsert_event(&new_event("0x1", 100, 3)).await.unwrap();
        h.target.fail_next_gas_price(ChainError::Transport("connection refused".into()));

        let event = stored(&h, "0x1").await;
        assert!(matches!(
            h.processor.process_event(&event).await,
            SettlementOutcome::RetryLater { .. }
        ));
        let event = stored(&h, "0x1").await;
        assert_eq!(event.status, EventStatus::Confirmed);
        assert!(h.target.releases().is_empty());
    }

    #[tokio::test]
    async fn test_missing_target_connection_defers() {
        let h = harness(0);
        h.store.upsert_event(&new_event("0x1", 100, 3)).await.unwrap();

        let registry = ChainRegistry::from_descriptors([descriptor(1, 0), descriptor(56, 0)]);
        let mut connections = ChainConnections::new();
        connections.insert(h.source.clone());
        let processor = SettlementProcessor::with_connections(
            Arc::new(registry),
            connections,
            h.store.clone(),
            h.notifier.clone(),
            Address::ZERO,
            ProcessorConfig::default(),
        );

        let event = stored(&h, "0x1").await;
        assert_eq!(
            processor.process_event(&event).await,
            SettlementOutcome::TargetUnavailable
        );
        assert_eq!(stored(&h, "0x1").await.status, EventStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_balances_and_status() {
        let h = harness(1);
        h.target
            .set_balance(Address::repeat_byte(0x11), U256::from(1_500_000_000_000_000_000u128));

        let balances = h.processor.all_balances().await;
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[&56].balance, "1.500000000000000000");
        assert_eq!(balances[&56].balance_wei, "1500000000000000000");
        assert_eq!(balances[&1].balance_wei, "0");

        let status = h.processor.status();
        assert!(!status.running);
        assert_eq!(status.connected_chains, vec![1, 56]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_cycle_immediately() {
        let h = harness(0);
        h.store.upsert_event(&new_event("0x1", 100, 0)).await.unwrap();
        let processor = Arc::new(h.processor);

        processor.start();
        processor.start();
        assert!(processor.is_running());
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(h.target.releases().len(), 1);
        processor.stop().await;
        assert!(!processor.is_running());
    }

    fn error_count(chain_id: u64, error_type: &str) -> f64 {
        metrics::ERRORS
            .with_label_values(&[chain_id.to_string().as_str(), error_type])
            .get()
    }

    #[tokio::test]
    async fn test_authorization_check_per_chain() {
        let relayer = Address::repeat_byte(0x11);
        let authorized = Arc::new(FakeChain::new(9_101));
        let unauthorized = Arc::new(FakeChain::new(9_102));
        let unreadable = Arc::new(FakeChain::new(9_103));
        authorized.authorize(relayer);
        unreadable.authorize(relayer);
        unreadable.fail_next_authorization(ChainError::Transport("connection refused".into()));

        let mut connections = ChainConnections::new();
        connections.insert(authorized);
        connections.insert(unauthorized);
        connections.insert(unreadable);
        let processor = SettlementProcessor::with_connections(
            Arc::new(ChainRegistry::from_descriptors([
                descriptor(9_101, 0),
                descriptor(9_102, 0),
                descriptor(9_103, 0),
            ])),
            connections,
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingNotifier::new()),
            relayer,
            ProcessorConfig::default(),
        );

        let unauthorized_before = error_count(9_102, "unauthorized");
        let unreadable_before = error_count(9_103, "authorization_check");

        let results = processor.check_authorization().await;
        assert_eq!(results[&9_101], Authorization::Authorized);
        assert_eq!(results[&9_102], Authorization::Unauthorized);
        assert!(matches!(&results[&9_103], Authorization::Unknown(msg) if msg.contains("connection refused")));

        assert_eq!(error_count(9_101, "unauthorized"), 0.0);
        assert_eq!(error_count(9_102, "unauthorized"), unauthorized_before + 1.0);
        assert_eq!(error_count(9_103, "authorization_check"), unreadable_before + 1.0);

        // The check never blocks settlement; a second run reads the chain again
        let results = processor.check_authorization().await;
        assert_eq!(results[&9_103], Authorization::Authorized);
    }

    #[tokio::test]
    async fn test_initialize_derives_relayer_address() {
        let processor = SettlementProcessor::initialize(
            Arc::new(ChainRegistry::from_descriptors(Vec::<ChainDescriptor>::new())),
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingNotifier::new()),
            ProcessorConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(
            processor.relayer_address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
        assert!(processor.status().connected_chains.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_rejects_bad_key() {
        let result = SettlementProcessor::initialize(
            Arc::new(ChainRegistry::from_descriptors(Vec::<ChainDescriptor>::new())),
            "not-a-key",
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingNotifier::new()),
            ProcessorConfig::default(),
        )
        .await;
        assert!(result.is_err());
    }
}
