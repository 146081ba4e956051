//! Operational monitors: service health, relayer balances and the daily report

use alloy::primitives::U256;
use chrono::{Duration as ChronoDuration, Utc};
use eyre::WrapErr;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::metrics;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::scheduler::Scheduler;
use crate::settlement::{ChainBalance, SettlementProcessor};
use crate::store::{EventStore, StatsTotals, StoreError};
use crate::watchers::EventWatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub watcher_running: bool,
    pub processor_running: bool,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.watcher_running && self.processor_running
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub period: String,
    #[serde(flatten)]
    pub totals: StatsTotals,
    pub success_rate: String,
}

pub struct Monitor {
    watcher: Arc<EventWatcher>,
    processor: Arc<SettlementProcessor>,
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(
        watcher: Arc<EventWatcher>,
        processor: Arc<SettlementProcessor>,
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            watcher,
            processor,
            store,
            notifier,
            config,
        }
    }

    /// Alert when either pipeline service is not running
    pub fn health_check(&self) -> HealthReport {
        let report = HealthReport {
            watcher_running: self.watcher.is_running(),
            processor_running: self.processor.is_running(),
        };
        metrics::set_up(report.healthy());

        if !report.healthy() {
            warn!(
                watcher_running = report.watcher_running,
                processor_running = report.processor_running,
                "Relayer services unhealthy"
            );
            self.notifier.notify(
                Notification::new(
                    NotificationKind::ServiceLifecycle,
                    "Relayer health check failed: not all services are running",
                )
                .with_data(json!({
                    "eventListener": report.watcher_running,
                    "transactionProcessor": report.processor_running,
                })),
            );
        }
        report
    }

    /// Record balances and alert on every chain below the threshold.
    /// Returns the chains that were low.
    pub async fn balance_check(&self) -> Vec<(u64, ChainBalance)> {
        let threshold = self.config.low_balance_threshold_wei;
        let mut low = Vec::new();

        for (chain_id, balance) in self.processor.all_balances().await {
            metrics::set_relayer_balance(chain_id, balance.balance.parse().unwrap_or(0.0));

            let wei: U256 = balance.balance_wei.parse().unwrap_or(U256::ZERO);
            if wei < threshold {
                warn!(
                    chain_id,
                    chain = %balance.name,
                    balance = %balance.balance,
                    "Relayer balance low"
                );
                self.notifier.notify(
                    Notification::new(
                        NotificationKind::LowBalance,
                        format!(
                            "Low relayer balance on {}: {} (threshold {} wei)",
                            balance.name, balance.balance, threshold
                        ),
                    )
                    .with_data(json!({
                        "chainId": chain_id,
                        "chain": balance.name,
                        "balance": balance.balance,
                        "balanceWei": balance.balance_wei,
                        "relayerAddress": self.processor.status().relayer_address,
                    })),
                );
                low.push((chain_id, balance));
            }
        }
        low
    }

    /// Rebuild yesterday's and today's aggregates, then report the trailing
    /// 24 hours.
    pub async fn daily_report(&self) -> Result<DailyReport, StoreError> {
        let today = Utc::now().date_naive();
        let yesterday = today - ChronoDuration::days(1);
        self.store.rebuild_daily_aggregates(yesterday).await?;
        self.store.rebuild_daily_aggregates(today).await?;

        let routes = self.store.route_stats(1).await?;
        let totals = StatsTotals::from_routes(&routes)?;
        let report = DailyReport {
            period: "24h".to_string(),
            success_rate: totals.success_rate(),
            totals,
        };

        info!(
            total_events = report.totals.total_events,
            failed = report.totals.failed,
            success_rate = %report.success_rate,
            volume = %report.totals.total_volume,
            "Daily report"
        );
        self.notifier.notify(
            Notification::new(
                NotificationKind::DailyReport,
                format!(
                    "Daily report: {} events, {} success rate, volume {}",
                    report.totals.total_events, report.success_rate, report.totals.total_volume
                ),
            )
            .with_data(json!({
                "period": report.period,
                "totalEvents": report.totals.total_events,
                "successRate": report.success_rate,
                "totalVolume": report.totals.total_volume,
                "failed": report.totals.failed,
            })),
        );
        Ok(report)
    }

    /// Register the three monitor tasks. None run before their first period.
    pub fn schedule(self: &Arc<Self>, scheduler: &mut Scheduler) {
        let monitor = self.clone();
        scheduler.every(
            "health-check",
            Duration::from_secs(self.config.health_check_interval_secs),
            false,
            move || {
                monitor.health_check();
                futures::future::ready(Ok::<(), eyre::Report>(()))
            },
        );

        let monitor = self.clone();
        scheduler.every(
            "balance-check",
            Duration::from_secs(self.config.balance_check_interval_secs),
            false,
            move || {
                let monitor = monitor.clone();
                async move {
                    monitor.balance_check().await;
                    Ok::<(), eyre::Report>(())
                }
            },
        );

        let monitor = self.clone();
        scheduler.every(
            "daily-report",
            Duration::from_secs(self.config.daily_report_interval_secs),
            false,
            move || {
                let monitor = monitor.clone();
                async move {
                    monitor
                        .daily_report()
                        .await
                        .map(|_| ())
                        .wrap_err("Daily report failed")
                }
            },
        );
    }
}
