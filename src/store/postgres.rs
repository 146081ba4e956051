//! PostgreSQL-backed [`EventStore`]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Row};
use tracing::{error, warn};

use super::{DailyAggregate, EventQuery, EventStore, RouteStats, StoreError, UpsertOutcome};
use crate::types::{BridgeEvent, EventKind, EventStatus, NewBridgeEvent, TxId};

// Amounts are NUMERIC(78,0). Inserts cast the decimal text ($n::NUMERIC),
// reads cast back to TEXT so no big-decimal type is needed on our side.
const EVENT_COLUMNS: &str = "tx_id, event_type, source_chain, target_chain, user_address, \
     token_address, amount::TEXT AS amount, target_address, block_number, transaction_hash, \
     status, confirmations, settlement_tx_hash, error_message, created_at, updated_at";

const AGGREGATE_COLUMNS: &str = "day, source_chain, target_chain, event_count, success_count, \
     failure_count, total_volume::TEXT AS total_volume";

#[derive(Debug, FromRow)]
struct EventRow {
    tx_id: String,
    event_type: EventKind,
    source_chain: i64,
    target_chain: i64,
    user_address: String,
    token_address: String,
    amount: String,
    target_address: String,
    block_number: i64,
    transaction_hash: String,
    status: EventStatus,
    confirmations: i64,
    settlement_tx_hash: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for BridgeEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(BridgeEvent {
            tx_id: row
                .tx_id
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{}", e)))?,
            kind: row.event_type,
            source_chain: row.source_chain as u64,
            target_chain: row.target_chain as u64,
            user_address: row.user_address,
            token_address: row.token_address,
            amount: row.amount,
            target_address: row.target_address,
            block_number: row.block_number as u64,
            transaction_hash: row.transaction_hash,
            status: row.status,
            confirmations: row.confirmations as u64,
            settlement_tx_hash: row.settlement_tx_hash,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AggregateRow {
    day: NaiveDate,
    source_chain: i64,
    target_chain: i64,
    event_count: i64,
    success_count: i64,
    failure_count: i64,
    total_volume: String,
}

impl From<AggregateRow> for DailyAggregate {
    fn from(row: AggregateRow) -> Self {
        DailyAggregate {
            day: row.day,
            source_chain: row.source_chain as u64,
            target_chain: row.target_chain as u64,
            event_count: row.event_count as u64,
            success_count: row.success_count as u64,
            failure_count: row.failure_count as u64,
            total_volume: row.total_volume,
        }
    }
}

fn db_int(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{} does not fit BIGINT", value)))
}

fn rows_to_events(rows: Vec<EventRow>) -> Result<Vec<BridgeEvent>, StoreError> {
    rows.into_iter().map(BridgeEvent::try_from).collect()
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .wrap_err("Failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .wrap_err("Failed to run database migrations")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn upsert_event(&self, event: &NewBridgeEvent) -> Result<UpsertOutcome, StoreError> {
        let stored = BridgeEvent::from_new(event, Utc::now());

        // (xmax = 0) is true only for a freshly inserted tuple
        let row = sqlx::query(
            r#"
            INSERT INTO bridge_events (tx_id, event_type, source_chain, target_chain,
                user_address, token_address, amount, target_address, block_number,
                transaction_hash, confirmations)
            VALUES ($1, $2, $3, $4, $5, $6, $7::NUMERIC, $8, $9, $10, $11)
            ON CONFLICT (tx_id) DO UPDATE SET
                confirmations = GREATEST(bridge_events.confirmations, EXCLUDED.confirmations),
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(stored.tx_id.to_hex())
        .bind(stored.kind)
        .bind(db_int(stored.source_chain)?)
        .bind(db_int(stored.target_chain)?)
        .bind(&stored.user_address)
        .bind(&stored.token_address)
        .bind(&stored.amount)
        .bind(&stored.target_address)
        .bind(db_int(stored.block_number)?)
        .bind(&stored.transaction_hash)
        .bind(db_int(stored.confirmations)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(tx_id = %event.tx_id, "SQL error upserting bridge event: {:?}", e);
            e
        })?;

        Ok(if row.get::<bool, _>("inserted") {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn set_status(
        &self,
        tx_id: TxId,
        status: EventStatus,
        settlement_tx_hash: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let key = tx_id.to_hex();
        let mut tx = self.pool.begin().await?;

        let current: Option<EventStatus> =
            sqlx::query_scalar("SELECT status FROM bridge_events WHERE tx_id = $1 FOR UPDATE")
                .bind(&key)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(current) = current else {
            warn!(tx_id = %tx_id, status = %status, "Status update for unknown event");
            return Ok(());
        };
        if current == status {
            return Ok(());
        }
        current.transition(status)?;

        sqlx::query(
            r#"
            UPDATE bridge_events
            SET status = $2,
                settlement_tx_hash = COALESCE($3, settlement_tx_hash),
                error_message = COALESCE($4, error_message),
                updated_at = NOW()
            WHERE tx_id = $1
            "#,
        )
        .bind(&key)
        .bind(status)
        .bind(settlement_tx_hash)
        .bind(error_message)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_confirmations(&self, tx_id: TxId, confirmations: u64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE bridge_events SET confirmations = $2, updated_at = NOW()
            WHERE tx_id = $1 AND confirmations < $2
            "#,
        )
        .bind(tx_id.to_hex())
        .bind(db_int(confirmations)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_for_settlement(&self) -> Result<Vec<BridgeEvent>, StoreError> {
        let sql = format!(
            "SELECT {} FROM bridge_events WHERE status IN ('pending', 'confirmed') \
             ORDER BY created_at ASC, id ASC",
            EVENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("SQL error getting events pending settlement: {:?}", e);
                e
            })?;
        rows_to_events(rows)
    }

    async fn watermark(&self, chain_id: u64) -> Result<u64, StoreError> {
        let block: Option<i64> =
            sqlx::query_scalar("SELECT block_number FROM processed_blocks WHERE chain_id = $1")
                .bind(db_int(chain_id)?)
                .fetch_optional(&self.pool)
                .await?;
        Ok(block.unwrap_or(0) as u64)
    }

    async fn set_watermark(&self, chain_id: u64, block_number: u64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO processed_blocks (chain_id, block_number, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (chain_id) DO UPDATE SET
                block_number = GREATEST(processed_blocks.block_number, EXCLUDED.block_number),
                updated_at = NOW()
            "#,
        )
        .bind(db_int(chain_id)?)
        .bind(db_int(block_number)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_settled(&self, tx_id: TxId) -> Result<bool, StoreError> {
        let settled: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM bridge_events WHERE tx_id = $1 AND status = 'completed')",
        )
        .bind(tx_id.to_hex())
        .fetch_one(&self.pool)
        .await?;
        Ok(settled)
    }

    async fn get_event(&self, tx_id: TxId) -> Result<Option<BridgeEvent>, StoreError> {
        let sql = format!("SELECT {} FROM bridge_events WHERE tx_id = $1", EVENT_COLUMNS);
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(tx_id.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(BridgeEvent::try_from).transpose()
    }

    async fn recent_events(&self, query: &EventQuery) -> Result<Vec<BridgeEvent>, StoreError> {
        let sql = format!(
            "SELECT {} FROM bridge_events \
             WHERE ($1::VARCHAR IS NULL OR status = $1) \
               AND ($2::BIGINT IS NULL OR source_chain = $2) \
               AND ($3::BIGINT IS NULL OR target_chain = $3) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4",
            EVENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(query.status.map(|s| s.as_str()))
            .bind(query.source_chain.map(db_int).transpose()?)
            .bind(query.target_chain.map(db_int).transpose()?)
            .bind(i64::from(query.effective_limit()))
            .fetch_all(&self.pool)
            .await?;
        rows_to_events(rows)
    }

    async fn route_stats(&self, days: u32) -> Result<Vec<RouteStats>, StoreError> {
        let days = i32::try_from(days).unwrap_or(i32::MAX);
        let rows = sqlx::query(
            r#"
            SELECT source_chain, target_chain,
                COUNT(*) AS total_events,
                COUNT(*) FILTER (WHERE status = 'completed') AS successful,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COALESCE(SUM(amount), 0)::TEXT AS total_volume
            FROM bridge_events
            WHERE created_at >= NOW() - make_interval(days => $1)
            GROUP BY source_chain, target_chain
            ORDER BY source_chain, target_chain
            "#,
        )
        .bind(days)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RouteStats {
                source_chain: row.get::<i64, _>("source_chain") as u64,
                target_chain: row.get::<i64, _>("target_chain") as u64,
                total_events: row.get::<i64, _>("total_events") as u64,
                successful: row.get::<i64, _>("successful") as u64,
                failed: row.get::<i64, _>("failed") as u64,
                total_volume: row.get("total_volume"),
            })
            .collect())
    }

    async fn rebuild_daily_aggregates(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<DailyAggregate>, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM daily_aggregates WHERE day = $1")
            .bind(day)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            r#"
            INSERT INTO daily_aggregates (day, source_chain, target_chain, event_count,
                success_count, failure_count, total_volume, updated_at)
            SELECT $1, source_chain, target_chain,
                COUNT(*),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COALESCE(SUM(amount), 0),
                NOW()
            FROM bridge_events
            WHERE (created_at AT TIME ZONE 'UTC')::DATE = $1
            GROUP BY source_chain, target_chain
            RETURNING {}
            "#,
            AGGREGATE_COLUMNS
        );
        let mut rows = sqlx::query_as::<_, AggregateRow>(&sql)
            .bind(day)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        rows.sort_by_key(|r| (r.source_chain, r.target_chain));
        Ok(rows.into_iter().map(DailyAggregate::from).collect())
    }

    async fn daily_aggregates(&self, since: NaiveDate) -> Result<Vec<DailyAggregate>, StoreError> {
        let sql = format!(
            "SELECT {} FROM daily_aggregates WHERE day >= $1 \
             ORDER BY day, source_chain, target_chain",
            AGGREGATE_COLUMNS
        );
        let rows = sqlx::query_as::<_, AggregateRow>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(DailyAggregate::from).collect())
    }

    async fn reset_failed(&self, tx_id: TxId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bridge_events
            SET status = 'confirmed', error_message = NULL, updated_at = NOW()
            WHERE tx_id = $1 AND status = 'failed'
            "#,
        )
        .bind(tx_id.to_hex())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
