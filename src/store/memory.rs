//! In-memory [`EventStore`] for tests

use alloy::primitives::U256;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::warn;

use super::{
    parse_amount, DailyAggregate, EventQuery, EventStore, RouteStats, StoreError, UpsertOutcome,
};
use crate::types::{BridgeEvent, EventStatus, NewBridgeEvent, TxId};

#[derive(Default)]
struct Inner {
    events: HashMap<TxId, (u64, BridgeEvent)>,
    watermarks: HashMap<u64, u64>,
    aggregates: BTreeMap<(NaiveDate, u64, u64), DailyAggregate>,
    next_seq: u64,
}

impl Inner {
    /// Events in insertion order
    fn ordered(&self) -> Vec<&(u64, BridgeEvent)> {
        let mut rows: Vec<_> = self.events.values().collect();
        rows.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then(a.0.cmp(&b.0)));
        rows
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a half-written row,
        // every mutation is a single map operation.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Default)]
struct RouteAccumulator {
    total: u64,
    successful: u64,
    failed: u64,
    volume: U256,
}

impl RouteAccumulator {
    fn add(&mut self, event: &BridgeEvent) -> Result<(), StoreError> {
        self.total += 1;
        match event.status {
            EventStatus::Completed => self.successful += 1,
            EventStatus::Failed => self.failed += 1,
            _ => {}
        }
        self.volume = self.volume.saturating_add(parse_amount(&event.amount)?);
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn upsert_event(&self, event: &NewBridgeEvent) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.lock();
        let now = Utc::now();

        if let Some((_, existing)) = inner.events.get_mut(&event.tx_id) {
            existing.confirmations = existing.confirmations.max(event.confirmations);
            existing.updated_at = now;
            return Ok(UpsertOutcome::Updated);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .events
            .insert(event.tx_id, (seq, BridgeEvent::from_new(event, now)));
        Ok(UpsertOutcome::Inserted)
    }

    async fn set_status(
        &self,
        tx_id: TxId,
        status: EventStatus,
        settlement_tx_hash: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let Some((_, event)) = inner.events.get_mut(&tx_id) else {
            warn!(tx_id = %tx_id, status = %status, "Status update for unknown event");
            return Ok(());
        };

        if event.status == status {
            return Ok(());
        }
        event.status = event.status.transition(status)?;
        if let Some(hash) = settlement_tx_hash {
            event.settlement_tx_hash = Some(hash.to_string());
        }
        if let Some(message) = error_message {
            event.error_message = Some(message.to_string());
        }
        event.updated_at = Utc::now();
        Ok(())
    }

    async fn set_confirmations(&self, tx_id: TxId, confirmations: u64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some((_, event)) = inner.events.get_mut(&tx_id) {
            if confirmations > event.confirmations {
                event.confirmations = confirmations;
                event.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn pending_for_settlement(&self) -> Result<Vec<BridgeEvent>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .ordered()
            .into_iter()
            .filter(|(_, e)| e.status.awaiting_settlement())
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn watermark(&self, chain_id: u64) -> Result<u64, StoreError> {
        Ok(self.lock().watermarks.get(&chain_id).copied().unwrap_or(0))
    }

    async fn set_watermark(&self, chain_id: u64, block_number: u64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let current = inner.watermarks.entry(chain_id).or_insert(0);
        *current = (*current).max(block_number);
        Ok(())
    }

    async fn is_settled(&self, tx_id: TxId) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .events
            .get(&tx_id)
            .is_some_and(|(_, e)| e.status == EventStatus::Completed))
    }

    async fn get_event(&self, tx_id: TxId) -> Result<Option<BridgeEvent>, StoreError> {
        Ok(self.lock().events.get(&tx_id).map(|(_, e)| e.clone()))
    }

    async fn recent_events(&self, query: &EventQuery) -> Result<Vec<BridgeEvent>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .ordered()
            .into_iter()
            .rev()
            .filter(|(_, e)| query.matches(e))
            .take(query.effective_limit() as usize)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn route_stats(&self, days: u32) -> Result<Vec<RouteStats>, StoreError> {
        let since = Utc::now() - Duration::days(i64::from(days));
        let inner = self.lock();

        let mut routes: BTreeMap<(u64, u64), RouteAccumulator> = BTreeMap::new();
        for (_, event) in inner.events.values() {
            if event.created_at >= since {
                routes
                    .entry((event.source_chain, event.target_chain))
                    .or_default()
                    .add(event)?;
            }
        }

        Ok(routes
            .into_iter()
            .map(|((source_chain, target_chain), acc)| RouteStats {
                source_chain,
                target_chain,
                total_events: acc.total,
                successful: acc.successful,
                failed: acc.failed,
                total_volume: acc.volume.to_string(),
            })
            .collect())
    }

    async fn rebuild_daily_aggregates(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<DailyAggregate>, StoreError> {
        let mut inner = self.lock();

        let mut routes: BTreeMap<(u64, u64), RouteAccumulator> = BTreeMap::new();
        for (_, event) in inner.events.values() {
            if event.created_at.date_naive() == day {
                routes
                    .entry((event.source_chain, event.target_chain))
                    .or_default()
                    .add(event)?;
            }
        }

        inner.aggregates.retain(|(d, _, _), _| *d != day);
        let mut rebuilt = Vec::with_capacity(routes.len());
        for ((source_chain, target_chain), acc) in routes {
            let aggregate = DailyAggregate {
                day,
                source_chain,
                target_chain,
                event_count: acc.total,
                success_count: acc.successful,
                failure_count: acc.failed,
                total_volume: acc.volume.to_string(),
            };
            inner
                .aggregates
                .insert((day, source_chain, target_chain), aggregate.clone());
            rebuilt.push(aggregate);
        }
        Ok(rebuilt)
    }

    async fn daily_aggregates(&self, since: NaiveDate) -> Result<Vec<DailyAggregate>, StoreError> {
        Ok(self
            .lock()
            .aggregates
            .range((since, 0, 0)..)
            .map(|(_, a)| a.clone())
            .collect())
    }

    async fn reset_failed(&self, tx_id: TxId) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.events.get_mut(&tx_id) {
            Some((_, event)) if event.status == EventStatus::Failed => {
                event.status = EventStatus::Confirmed;
                event.error_message = None;
                event.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn close(&self) {}
}
