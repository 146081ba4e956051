//! Historical sweep over `[watermark + 1, head - minConfirmations]`

use tracing::{debug, info, warn};

use super::ingest::{IngestError, Ingestor, Observation, ObservationSource};
use crate::chains::ChainDescriptor;
use crate::client::ChainClient;
use crate::config::WatcherConfig;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Inclusive block range covered, `None` when already caught up
    pub range: Option<(u64, u64)>,
    pub windows: u64,
    pub observed: u64,
    /// Events that failed to ingest and will be retried next sweep
    pub failed: u64,
}

/// First block of the next sweep. Without a watermark the sweep starts
/// `lookback` blocks behind the safe head (0 means from genesis).
///
/// The store reports 0 for a chain it has never seen, so a watermark that was
/// really persisted as block 0 is read as unset and the lookback range is
/// scanned again. Ingestion is idempotent, which makes the rescan harmless.
pub fn sweep_start(watermark: u64, safe_head: u64, lookback: u64) -> u64 {
    if watermark > 0 {
        watermark + 1
    } else if lookback == 0 {
        0
    } else {
        (safe_head + 1).saturating_sub(lookback)
    }
}

/// Sweep one chain. Events are ingested one at a time and a failing event
/// never stops the others. The watermark follows each window's upper bound
/// until the first failure, then stays just below the lowest failed block so
/// the next sweep retries it. Later windows are still ingested.
///
/// Reading the head or a window's logs is all-or-nothing: an error there
/// returns without touching the watermark.
pub async fn sweep_chain(
    ingestor: &Ingestor,
    client: &dyn ChainClient,
    descriptor: &ChainDescriptor,
    config: &WatcherConfig,
) -> Result<SweepReport, IngestError> {
    let chain_id = descriptor.chain_id;
    let store = ingestor.store();

    let head = client.block_number().await?;
    let safe_head = head.saturating_sub(descriptor.min_confirmations);
    let watermark = store.watermark(chain_id).await?;
    let from = sweep_start(watermark, safe_head, config.initial_lookback_blocks);

    if from > safe_head {
        debug!(chain_id, watermark, safe_head, "Sweep caught up");
        return Ok(SweepReport::default());
    }

    let range = config.max_block_range.max(1);
    let mut report = SweepReport {
        range: Some((from, safe_head)),
        ..SweepReport::default()
    };

    let mut lowest_failed: Option<u64> = None;
    let mut window_start = from;
    while window_start <= safe_head {
        let window_end = window_start.saturating_add(range - 1).min(safe_head);

        let logs = client.bridge_logs(window_start, window_end).await?;
        for log in logs {
            let block_number = log.block_number();
            let tx_id = log.tx_id();
            let observation = Observation {
                chain_id,
                log,
                head,
            };
            match ingestor.ingest(&observation, ObservationSource::Sweep).await {
                Ok(_) => report.observed += 1,
                Err(e) => {
                    warn!(
                        chain_id,
                        tx_id = %tx_id,
                        block_number,
                        error = %e,
                        "Failed to ingest historical event"
                    );
                    metrics::record_error(chain_id, "ingest");
                    report.failed += 1;
                    lowest_failed = Some(lowest_failed.map_or(block_number, |b| b.min(block_number)));
                }
            }
        }

        let advance_to = match lowest_failed {
            None => Some(window_end),
            Some(block) => block.checked_sub(1),
        };
        if let Some(block) = advance_to {
            store.set_watermark(chain_id, block).await?;
            metrics::set_watermark(chain_id, block);
        }
        report.windows += 1;

        debug!(
            chain_id,
            from_block = window_start,
            to_block = window_end,
            "Sweep window ingested"
        );
        window_start = window_end + 1;
    }

    if let Some(block) = lowest_failed {
        warn!(
            chain_id,
            failed = report.failed,
            held_at_block = block,
            "Historical sweep left events behind; watermark held for retry"
        );
    }
    if report.observed > 0 {
        info!(
            chain_id,
            from_block = from,
            to_block = safe_head,
            events = report.observed,
            "Historical sweep complete"
        );
    }
    Ok(report)
}
