//! Persistent Store
//!
//! Durable record of bridge events, their lifecycle status and the per-chain
//! processed-block watermark. [`postgres::PgStore`] is the production backend;
//! [`memory::MemoryStore`] backs tests.
//!
//! Every operation is safe to call concurrently.

pub mod memory;
pub mod postgres;

use alloy::primitives::U256;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::types::{BridgeEvent, EventStatus, NewBridgeEvent, TransitionError, TxId};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Upper bound on `EventQuery::limit`
pub const MAX_QUERY_LIMIT: u32 = 100;
pub const DEFAULT_QUERY_LIMIT: u32 = 20;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Whether an upsert created the row or merged into an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Filters for recent-event listings. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub status: Option<EventStatus>,
    pub source_chain: Option<u64>,
    pub target_chain: Option<u64>,
    pub limit: u32,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            status: None,
            source_chain: None,
            target_chain: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl EventQuery {
    /// Limit clamped to `1..=MAX_QUERY_LIMIT`
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_QUERY_LIMIT)
    }

    pub fn matches(&self, event: &BridgeEvent) -> bool {
        self.status.map_or(true, |s| event.status == s)
            && self.source_chain.map_or(true, |c| event.source_chain == c)
            && self.target_chain.map_or(true, |c| event.target_chain == c)
    }
}

/// Per-route statistics over a trailing window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStats {
    pub source_chain: u64,
    pub target_chain: u64,
    pub total_events: u64,
    pub successful: u64,
    pub failed: u64,
    /// Exact decimal sum of event amounts
    pub total_volume: String,
}

/// Rebuildable per-day, per-route aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAggregate {
    pub day: NaiveDate,
    pub source_chain: u64,
    pub target_chain: u64,
    pub event_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_volume: String,
}

/// Totals across routes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsTotals {
    pub total_events: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_volume: String,
}

impl StatsTotals {
    pub fn from_routes(routes: &[RouteStats]) -> Result<Self, StoreError> {
        let mut volume = U256::ZERO;
        for route in routes {
            volume = volume.saturating_add(parse_amount(&route.total_volume)?);
        }
        Ok(Self {
            total_events: routes.iter().map(|r| r.total_events).sum(),
            successful: routes.iter().map(|r| r.successful).sum(),
            failed: routes.iter().map(|r| r.failed).sum(),
            total_volume: volume.to_string(),
        })
    }

    /// Successful share of all events, as a percentage with two decimals
    pub fn success_rate(&self) -> String {
        if self.total_events == 0 {
            return "0%".to_string();
        }
        let basis_points = self.successful * 10_000 / self.total_events;
        format!("{}.{:02}%", basis_points / 100, basis_points % 100)
    }
}

pub(crate) fn parse_amount(value: &str) -> Result<U256, StoreError> {
    U256::from_str_radix(value, 10).map_err(|e| StoreError::Corrupt(format!("amount {}: {}", value, e)))
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert-or-merge keyed by tx id. A merge refreshes `updated_at` and
    /// never regresses status or confirmations.
    async fn upsert_event(&self, event: &NewBridgeEvent) -> Result<UpsertOutcome, StoreError>;

    /// Validated status transition. Unknown tx ids are logged and ignored;
    /// setting the current status again is a no-op.
    async fn set_status(
        &self,
        tx_id: TxId,
        status: EventStatus,
        settlement_tx_hash: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Raise the confirmation count; lower or equal counts are not written.
    async fn set_confirmations(&self, tx_id: TxId, confirmations: u64) -> Result<(), StoreError>;

    /// Events in `pending` or `confirmed`, oldest first
    async fn pending_for_settlement(&self) -> Result<Vec<BridgeEvent>, StoreError>;

    /// Highest fully-ingested block, 0 when never set
    async fn watermark(&self, chain_id: u64) -> Result<u64, StoreError>;

    /// Raise the watermark; never lowers it
    async fn set_watermark(&self, chain_id: u64, block_number: u64) -> Result<(), StoreError>;

    async fn is_settled(&self, tx_id: TxId) -> Result<bool, StoreError>;

    async fn get_event(&self, tx_id: TxId) -> Result<Option<BridgeEvent>, StoreError>;

    async fn recent_events(&self, query: &EventQuery) -> Result<Vec<BridgeEvent>, StoreError>;

    /// Per-route statistics for events created in the trailing `days` days
    async fn route_stats(&self, days: u32) -> Result<Vec<RouteStats>, StoreError>;

    /// Recompute the aggregate rows for `day` (UTC) from the events table
    async fn rebuild_daily_aggregates(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<DailyAggregate>, StoreError>;

    async fn daily_aggregates(&self, since: NaiveDate) -> Result<Vec<DailyAggregate>, StoreError>;

    /// Administrative `failed → confirmed`. Clears the error message.
    /// Returns false when the event does not exist or is not failed.
    async fn reset_failed(&self, tx_id: TxId) -> Result<bool, StoreError>;

    async fn close(&self);
}
