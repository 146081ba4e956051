//! The single ingestion path shared by live subscriptions and sweeps

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{ChainConnections, ChainError};
use crate::metrics;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::store::{EventStore, StoreError, UpsertOutcome};
use crate::types::{BridgeEvent, NewBridgeEvent, RawBridgeLog};

/// Where an observation came from (logging only; both paths ingest the same way)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationSource {
    Live,
    Sweep,
}

impl ObservationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationSource::Live => "live",
            ObservationSource::Sweep => "sweep",
        }
    }
}

/// One decoded log plus the source head it was observed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub chain_id: u64,
    pub log: RawBridgeLog,
    pub head: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Recorded { new: bool, confirmations: u64 },
    /// Completed events are never touched again
    AlreadySettled,
    /// Malformed event (same source and target chain, zero target)
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("no connection for chain {0}")]
    NoConnection(u64),
}

pub struct Ingestor {
    store: Arc<dyn EventStore>,
    connections: ChainConnections,
    notifier: Arc<dyn Notifier>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn EventStore>,
        connections: ChainConnections,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            connections,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Normalize, deduplicate and persist one observation
    pub async fn ingest(
        &self,
        observation: &Observation,
        source: ObservationSource,
    ) -> Result<IngestOutcome, IngestError> {
        let Observation {
            chain_id,
            log,
            head,
        } = observation;
        let tx_id = log.tx_id();

        if self.store.is_settled(tx_id).await? {
            debug!(chain_id, tx_id = %tx_id, source = source.as_str(), "Event already settled, dropping");
            return Ok(IngestOutcome::AlreadySettled);
        }

        let event = self.normalize(*chain_id, log, *head).await?;
        if let Err(reason) = event.validate() {
            warn!(
                chain_id,
                tx_id = %tx_id,
                reason = %reason,
                "Rejecting malformed bridge event"
            );
            return Ok(IngestOutcome::Rejected(reason.to_string()));
        }

        let outcome = self.store.upsert_event(&event).await?;
        self.store
            .set_confirmations(tx_id, event.confirmations)
            .await?;

        let new = outcome == UpsertOutcome::Inserted;
        if new {
            info!(
                chain_id,
                tx_id = %tx_id,
                kind = %event.kind,
                target_chain = event.target_chain,
                block_number = event.block_number,
                confirmations = event.confirmations,
                source = source.as_str(),
                "New bridge event"
            );
            metrics::record_event_observed(*chain_id, event.kind.as_str());

            let stored = BridgeEvent::from_new(&event, chrono::Utc::now());
            self.notifier.notify(Notification::for_event(
                NotificationKind::NewEvent,
                format!(
                    "New {} event on chain {} for chain {}",
                    event.kind, event.source_chain, event.target_chain
                ),
                &stored,
            ));
        }

        Ok(IngestOutcome::Recorded {
            new,
            confirmations: event.confirmations,
        })
    }

    async fn normalize(
        &self,
        chain_id: u64,
        log: &RawBridgeLog,
        head: u64,
    ) -> Result<NewBridgeEvent, IngestError> {
        let confirmations = head.saturating_sub(log.block_number());

        let event = match log {
            RawBridgeLog::Locked {
                tx_id,
                user,
                token,
                amount,
                target_chain,
                target_address,
                block_number,
                transaction_hash,
            } => NewBridgeEvent {
                tx_id: *tx_id,
                kind: log.kind(),
                source_chain: chain_id,
                target_chain: *target_chain,
                user_address: *user,
                token_address: *token,
                amount: *amount,
                target_address: *target_address,
                block_number: *block_number,
                transaction_hash: *transaction_hash,
                confirmations,
            },
            RawBridgeLog::Burned {
                tx_id,
                user,
                token,
                amount,
                block_number,
                transaction_hash,
            } => {
                // Burns only carry the id; the route lives in contract storage
                let client = self
                    .connections
                    .get(chain_id)
                    .ok_or(IngestError::NoConnection(chain_id))?;
                let tx = client.get_transaction(*tx_id).await?;

                NewBridgeEvent {
                    tx_id: *tx_id,
                    kind: log.kind(),
                    source_chain: chain_id,
                    target_chain: tx.target_chain,
                    user_address: *user,
                    token_address: *token,
                    amount: *amount,
                    target_address: tx.target_address,
                    block_number: *block_number,
                    transaction_hash: *transaction_hash,
                    confirmations,
                }
            }
        };

        Ok(event)
    }
}
