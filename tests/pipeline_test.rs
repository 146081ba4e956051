//! End-to-end pipeline tests against in-process chains
//!
//! Run with: cargo test --features testing --test pipeline_test

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{keccak256, Address, U256};
use dexbridge_relayer::chains::ChainRegistry;
use dexbridge_relayer::client::{ChainConnections, ChainError};
use dexbridge_relayer::config::{ProcessorConfig, WatcherConfig};
use dexbridge_relayer::notify::NotificationKind;
use dexbridge_relayer::settlement::SettlementProcessor;
use dexbridge_relayer::store::{EventStore, MemoryStore};
use dexbridge_relayer::testing::{descriptor, tx_id, FakeChain, RecordingNotifier};
use dexbridge_relayer::types::{EventStatus, RawBridgeLog, TxId};
use dexbridge_relayer::watchers::{EventWatcher, Ingestor, Observation, ObservationSource};

const SOURCE: u64 = 1;
const TARGET: u64 = 56;
const TARGET_MIN_CONFIRMATIONS: u64 = 15;
const GAS_CEILING: u128 = 20_000_000_000;

struct Pipeline {
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    source: Arc<FakeChain>,
    target: Arc<FakeChain>,
    watcher: EventWatcher,
    processor: Arc<SettlementProcessor>,
}

fn pipeline() -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let source = Arc::new(FakeChain::new(SOURCE));
    let target = Arc::new(FakeChain::new(TARGET));

    let registry = Arc::new(ChainRegistry::from_descriptors([
        descriptor(SOURCE, 12),
        descriptor(TARGET, TARGET_MIN_CONFIRMATIONS),
    ]));
    let mut connections = ChainConnections::new();
    connections.insert(source.clone());
    connections.insert(target.clone());

    let watcher = EventWatcher::with_connections(
        registry.clone(),
        connections.clone(),
        store.clone(),
        notifier.clone(),
        WatcherConfig {
            sweep_interval_ms: 30_000,
            max_block_range: 1_000,
            initial_lookback_blocks: 1_000,
        },
    );
    let processor = Arc::new(SettlementProcessor::with_connections(
        registry,
        connections,
        store.clone(),
        notifier.clone(),
        Address::repeat_byte(0x11),
        ProcessorConfig {
            processing_interval_ms: 30_000,
            submission_delay_ms: 1_000,
        },
    ));

    Pipeline {
        store,
        notifier,
        source,
        target,
        watcher,
        processor,
    }
}

fn lock_log(id: TxId, amount: u64, block_number: u64) -> RawBridgeLog {
    RawBridgeLog::Locked {
        tx_id: id,
        user: Address::repeat_byte(0xaa),
        token: Address::repeat_byte(0xbb),
        amount: U256::from(amount),
        target_chain: TARGET,
        target_address: Address::repeat_byte(0xcc),
        block_number,
        transaction_hash: keccak256(id.as_bytes()),
    }
}

#[tokio::test]
async fn test_pending_event_confirms_once_deep_enough() {
    let p = pipeline();
    let id = tx_id("0xabc");
    p.source.set_head(1_000);

    // Observed at the head: zero confirmations
    let ingestor = Ingestor::new(p.store.clone(), ChainConnections::new(), p.notifier.clone());
    ingestor
        .ingest(
            &Observation {
                chain_id: SOURCE,
                log: lock_log(id, 100, 1_000),
                head: 1_000,
            },
            ObservationSource::Live,
        )
        .await
        .unwrap();

    let event = p.store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Pending);
    assert_eq!(event.confirmations, 0);
    assert_eq!(event.amount, "100");

    p.processor.process_pending().await.unwrap();
    assert_eq!(p.store.get_event(id).await.unwrap().unwrap().status, EventStatus::Pending);

    // Chain advances by the target's threshold; hold gas high to stop at confirmed
    p.source.set_head(1_000 + TARGET_MIN_CONFIRMATIONS);
    p.target.set_gas_price(GAS_CEILING + 1);
    p.processor.process_pending().await.unwrap();

    let event = p.store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Confirmed);
    assert_eq!(event.confirmations, TARGET_MIN_CONFIRMATIONS);

    // Gas back under the ceiling: settles
    p.target.set_gas_price(GAS_CEILING);
    p.processor.process_pending().await.unwrap();

    let event = p.store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Completed);
    assert_eq!(
        event.settlement_tx_hash,
        Some(format!("{:?}", FakeChain::settlement_hash(id)))
    );
    assert_eq!(p.notifier.count(NotificationKind::SettlementSuccess), 1);

    // Completed events are never re-settled
    p.processor.process_pending().await.unwrap();
    assert_eq!(p.target.releases().len(), 1);
}

#[tokio::test]
async fn test_failed_receipt_marks_event_failed() {
    let p = pipeline();
    let id = tx_id("0xabc");
    p.source.push_log(lock_log(id, 100, 1_000));
    p.source.set_head(1_100);
    p.watcher.sweep_chain(SOURCE).await.unwrap();

    p.target.push_release_result(Err(ChainError::Reverted {
        tx_hash: keccak256(b"mined"),
    }));
    let report = p.processor.process_pending().await.unwrap();
    assert_eq!(report.failed, 1);

    let event = p.store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Failed);
    assert_eq!(event.settlement_tx_hash, None);
    assert_eq!(event.error_message.as_deref(), Some("Transaction failed"));
    assert_eq!(p.notifier.count(NotificationKind::SettlementFailure), 1);

    // Failed events leave the settlement queue
    p.processor.process_pending().await.unwrap();
    assert_eq!(p.target.releases().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_live_and_sweep_store_one_row() {
    let p = pipeline();
    let id = tx_id("0xabc");
    p.source.set_head(1_000);

    // Live subscription starts at head 1000 and the sweep covers history
    p.watcher.start();
    tokio::time::sleep(Duration::from_millis(10)).await;

    p.source.push_log(lock_log(id, 100, 1_001));
    p.source.set_head(1_020);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(p.store.get_event(id).await.unwrap().is_some());

    // The next scheduled sweep sees the same event below the safe head
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(p
        .source
        .log_requests()
        .contains(&(989, 1_008)));

    p.watcher.stop().await;
    assert_eq!(p.store.len(), 1);
    assert_eq!(p.notifier.count(NotificationKind::NewEvent), 1);
    assert_eq!(p.store.watermark(SOURCE).await.unwrap(), 1_008);
}

#[tokio::test]
async fn test_gas_ceiling_breach_defers_settlement() {
    let p = pipeline();
    let id = tx_id("0xabc");
    p.source.push_log(lock_log(id, 100, 1_000));
    p.source.set_head(1_100);
    p.watcher.sweep_chain(SOURCE).await.unwrap();

    p.target.set_gas_price(GAS_CEILING * 2);
    p.processor.process_pending().await.unwrap();
    p.processor.process_pending().await.unwrap();

    let event = p.store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Confirmed);
    assert!(event.error_message.is_none());
    assert!(p.target.releases().is_empty());
    assert_eq!(p.notifier.count(NotificationKind::SettlementFailure), 0);
}

#[tokio::test(start_paused = true)]
async fn test_oldest_event_settles_first() {
    let p = pipeline();
    p.source.push_log(lock_log(tx_id("0x1"), 1, 900));
    p.source.set_head(1_000);
    p.watcher.sweep_chain(SOURCE).await.unwrap();

    p.source.push_log(lock_log(tx_id("0x2"), 2, 1_050));
    p.source.set_head(1_100);
    p.watcher.sweep_chain(SOURCE).await.unwrap();

    let started = tokio::time::Instant::now();
    let report = p.processor.process_pending().await.unwrap();
    assert_eq!(report.completed, 2);
    // One submission delay between the two events
    assert!(started.elapsed() >= Duration::from_secs(1));

    let order: Vec<TxId> = p.target.releases().iter().map(|r| r.tx_id).collect();
    assert_eq!(order, vec![tx_id("0x1"), tx_id("0x2")]);
}

#[tokio::test]
async fn test_watermark_never_rewinds() {
    let p = pipeline();
    p.source.set_head(2_000);
    p.watcher.sweep_chain(SOURCE).await.unwrap();
    let first = p.store.watermark(SOURCE).await.unwrap();
    assert_eq!(first, 1_988);

    // A lagging RPC reports an older head: nothing is requested or rewound
    p.source.set_head(1_500);
    let requests_before = p.source.log_requests().len();
    p.watcher.sweep_chain(SOURCE).await.unwrap();
    assert_eq!(p.source.log_requests().len(), requests_before);
    assert_eq!(p.store.watermark(SOURCE).await.unwrap(), first);

    p.store.set_watermark(SOURCE, 10).await.unwrap();
    assert_eq!(p.store.watermark(SOURCE).await.unwrap(), first);

    // First sweep started at the lookback boundary
    assert!(p.source.log_requests().iter().all(|(from, _)| *from >= 989));
}

#[tokio::test]
async fn test_admin_reset_allows_resettlement() {
    let p = pipeline();
    let id = tx_id("0xabc");
    p.source.push_log(lock_log(id, 100, 1_000));
    p.source.set_head(1_100);
    p.watcher.sweep_chain(SOURCE).await.unwrap();

    p.target.push_release_result(Err(ChainError::Contract(
        "execution reverted: not a relayer".into(),
    )));
    p.processor.process_pending().await.unwrap();
    assert_eq!(p.store.get_event(id).await.unwrap().unwrap().status, EventStatus::Failed);

    assert!(p.store.reset_failed(id).await.unwrap());
    p.processor.process_pending().await.unwrap();

    let event = p.store.get_event(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Completed);
    assert_eq!(p.target.releases().len(), 2);
}
