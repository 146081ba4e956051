//! Live per-chain subscription
//!
//! A producer task polls the chain head every block time and publishes each
//! new bridge log as an [`Observation`] on a bounded channel. A consumer task
//! drains the channel into the shared [`Ingestor`], so live events take the
//! exact same path as swept ones.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ingest::{Ingestor, Observation, ObservationSource};
use crate::client::ChainClient;
use crate::metrics;

const CHANNEL_CAPACITY: usize = 256;

pub struct LiveSubscription {
    chain_id: u64,
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl LiveSubscription {
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Stop polling. The consumer exits once the channel is drained.
    pub fn unsubscribe(self) {
        self.producer.abort();
        drop(self.consumer);
        debug!(chain_id = self.chain_id, "Live subscription closed");
    }
}

/// Start watching new blocks on `client`, beginning after the head at the
/// time of the call. Older blocks are the sweep's job.
pub fn subscribe(
    client: Arc<dyn ChainClient>,
    ingestor: Arc<Ingestor>,
    poll_interval: Duration,
    max_block_range: u64,
) -> LiveSubscription {
    let chain_id = client.chain_id();
    let (tx, mut rx) = mpsc::channel::<Observation>(CHANNEL_CAPACITY);
    let poll_interval = poll_interval.max(Duration::from_millis(10));
    let max_block_range = max_block_range.max(1);

    let producer = tokio::spawn(async move {
        let mut last = loop {
            match client.block_number().await {
                Ok(head) => break head,
                Err(e) => {
                    warn!(chain_id, error = %e, "Failed to read head for live subscription, retrying");
                    metrics::record_error(chain_id, "subscribe");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        };
        info!(chain_id, from_block = last + 1, "Live subscription started");

        loop {
            tokio::time::sleep(poll_interval).await;

            let head = match client.block_number().await {
                Ok(head) => head,
                Err(e) => {
                    warn!(chain_id, error = %e, "Failed to poll chain head");
                    metrics::record_error(chain_id, "poll");
                    continue;
                }
            };
            if head <= last {
                continue;
            }

            let to_block = head.min(last + max_block_range);
            let logs = match client.bridge_logs(last + 1, to_block).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(
                        chain_id,
                        from_block = last + 1,
                        to_block,
                        error = %e,
                        "Failed to fetch live logs"
                    );
                    metrics::record_error(chain_id, "poll");
                    continue;
                }
            };

            for log in logs {
                let observation = Observation {
                    chain_id,
                    log,
                    head,
                };
                if tx.send(observation).await.is_err() {
                    return;
                }
            }
            last = to_block;
        }
    });

    let consumer = tokio::spawn(async move {
        while let Some(observation) = rx.recv().await {
            if let Err(e) = ingestor.ingest(&observation, ObservationSource::Live).await {
                warn!(
                    chain_id,
                    tx_id = %observation.log.tx_id(),
                    error = %e,
                    "Failed to ingest live event; the sweep will pick it up"
                );
                metrics::record_error(chain_id, "ingest");
            }
        }
    });

    LiveSubscription {
        chain_id,
        producer,
        consumer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChainConnections, ChainError};
    use crate::store::{EventStore, MemoryStore};
    use crate::testing::{tx_id, FakeChain, RecordingNotifier};

    fn setup(chain: &Arc<FakeChain>) -> (Arc<Ingestor>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut connections = ChainConnections::new();
        connections.insert(chain.clone());
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            connections,
            Arc::new(RecordingNotifier::new()),
        ));
        (ingestor, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_blocks_are_ingested() {
        let chain = Arc::new(FakeChain::new(1));
        chain.set_head(100);
        let (ingestor, store) = setup(&chain);

        let sub = subscribe(chain.clone(), ingestor, Duration::from_secs(1), 1_000);
        tokio::time::sleep(Duration::from_millis(10)).await;

        chain.push_log(FakeChain::locked(tx_id("0x1"), 56, 101));
        chain.set_head(103);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let stored = store.get_event(tx_id("0x1")).await.unwrap().unwrap();
        assert_eq!(stored.confirmations, 2);
        assert_eq!(chain.log_requests(), vec![(101, 103)]);
        sub.unsubscribe();
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocks_before_subscribe_are_left_to_sweep() {
        let chain = Arc::new(FakeChain::new(1));
        chain.push_log(FakeChain::locked(tx_id("0x1"), 56, 50));
        chain.set_head(100);
        let (ingestor, store) = setup(&chain);

        let sub = subscribe(chain.clone(), ingestor, Duration::from_secs(1), 1_000);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(store.is_empty());
        assert!(chain.log_requests().is_empty());
        sub.unsubscribe();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_is_retried_from_same_block() {
        let chain = Arc::new(FakeChain::new(1));
        chain.set_head(10);
        let (ingestor, store) = setup(&chain);

        let sub = subscribe(chain.clone(), ingestor, Duration::from_secs(1), 1_000);
        tokio::time::sleep(Duration::from_millis(10)).await;

        chain.push_log(FakeChain::locked(tx_id("0x2"), 56, 11));
        chain.set_head(12);
        chain.fail_next_logs(ChainError::Transport("timeout".into()));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(chain.log_requests(), vec![(11, 12), (11, 12)]);
        assert_eq!(store.len(), 1);
        sub.unsubscribe();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_capped_to_block_range() {
        let chain = Arc::new(FakeChain::new(1));
        chain.set_head(0);
        let (ingestor, _store) = setup(&chain);

        let sub = subscribe(chain.clone(), ingestor, Duration::from_secs(1), 100);
        tokio::time::sleep(Duration::from_millis(10)).await;
        chain.set_head(250);
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(
            chain.log_requests(),
            vec![(1, 100), (101, 200), (201, 250)]
        );
        sub.unsubscribe();
    }
}
