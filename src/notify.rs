//! Notification Sink
//!
//! Fire-and-forget alerting. [`Notifier::notify`] never blocks and never
//! fails; webhook delivery happens on background tasks and its errors are
//! only logged.
//!
//! ```text
//!   Watcher ──► NewEvent ───────────┐
//!   Processor ─► Settlement* ───────┤
//!   Monitor ───► LowBalance/Report ─┼──► Notifier ──► log + Discord/Slack/Telegram
//!   main ──────► ServiceLifecycle ──┘
//! ```

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AlertConfig;
use crate::types::BridgeEvent;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECS: u64 = 2;
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    NewEvent,
    SettlementSuccess,
    SettlementFailure,
    ProcessingError,
    LowBalance,
    ServiceLifecycle,
    DailyReport,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewEvent => "new-event",
            NotificationKind::SettlementSuccess => "settlement-success",
            NotificationKind::SettlementFailure => "settlement-failure",
            NotificationKind::ProcessingError => "processing-error",
            NotificationKind::LowBalance => "low-balance",
            NotificationKind::ServiceLifecycle => "service-lifecycle",
            NotificationKind::DailyReport => "daily-report",
        }
    }

    fn discord_color(&self) -> u32 {
        match self {
            NotificationKind::NewEvent => 0x3498db,
            NotificationKind::SettlementSuccess => 0x2ecc71,
            NotificationKind::SettlementFailure => 0xe74c3c,
            NotificationKind::ProcessingError => 0xf39c12,
            NotificationKind::LowBalance => 0xf1c40f,
            NotificationKind::ServiceLifecycle => 0x9b59b6,
            NotificationKind::DailyReport => 0x95a5a6,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub data: Value,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Notification about a single bridge event
    pub fn for_event(kind: NotificationKind, message: impl Into<String>, event: &BridgeEvent) -> Self {
        Self::new(kind, message).with_data(json!({
            "txId": event.tx_id.to_hex(),
            "sourceChain": event.source_chain,
            "targetChain": event.target_chain,
            "amount": event.amount,
            "tokenAddress": event.token_address,
            "targetAddress": event.target_address,
        }))
    }

    /// Attach or overwrite one field of `data`
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.data.is_object() {
            self.data = json!({});
        }
        if let Some(map) = self.data.as_object_mut() {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

/// Render the human-readable alert text shared by every channel
pub fn format_message(notification: &Notification) -> String {
    let data = &notification.data;
    let field = |key: &str| match data.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };

    let mut message = String::from("DexBridge Relayer Alert\n");
    message.push_str(&format!("Type: {}\n", notification.kind));
    message.push_str(&format!("Time: {}\n", Utc::now().to_rfc3339()));
    message.push_str(&format!("Message: {}\n", notification.message));

    if let Some(tx_id) = field("txId") {
        message.push_str(&format!("Transaction ID: {}\n", tx_id));
    }
    if let (Some(source), Some(target)) = (field("sourceChain"), field("targetChain")) {
        message.push_str(&format!("Route: Chain {} -> Chain {}\n", source, target));
    }
    if let (Some(amount), Some(token)) = (field("amount"), field("tokenAddress")) {
        message.push_str(&format!("Amount: {} tokens\n", amount));
        message.push_str(&format!("Token: {}\n", token));
    }
    if let Some(hash) = field("settlementTxHash") {
        message.push_str(&format!("Relay TX: {}\n", hash));
    }
    if let Some(error) = field("error") {
        message.push_str(&format!("Error: {}\n", error));
    }

    message
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Hand off a notification. Must return immediately.
    fn notify(&self, notification: Notification);

    /// Wait for in-flight deliveries (used on shutdown)
    async fn flush(&self) {}
}

/// Log-only delivery
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        info!(
            kind = %notification.kind,
            data = %notification.data,
            "{}",
            notification.message
        );
    }
}

/// Discord, Slack and Telegram delivery. Every notification is also logged.
pub struct WebhookNotifier {
    client: Client,
    config: AlertConfig,
    telegram_api_base: String,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl WebhookNotifier {
    pub fn new(config: AlertConfig) -> Self {
        Self::with_telegram_api_base(config, TELEGRAM_API_BASE)
    }

    pub fn with_telegram_api_base(config: AlertConfig, api_base: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        Self {
            client,
            config,
            telegram_api_base: api_base.trim_end_matches('/').to_string(),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    fn deliveries(&self, notification: &Notification) -> Vec<(&'static str, String, Value)> {
        let text = format_message(notification);
        let mut deliveries = Vec::new();

        if let Some(url) = &self.config.discord_webhook_url {
            deliveries.push((
                "discord",
                url.clone(),
                json!({
                    "embeds": [{
                        "title": "DexBridge Relayer Alert",
                        "description": text,
                        "color": notification.kind.discord_color(),
                        "timestamp": Utc::now().to_rfc3339(),
                        "footer": { "text": "DexBridge Relayer Service" }
                    }]
                }),
            ));
        }

        if let Some(url) = &self.config.slack_webhook_url {
            deliveries.push((
                "slack",
                url.clone(),
                json!({
                    "attachments": [{
                        "color": format!("#{:06x}", notification.kind.discord_color()),
                        "title": "DexBridge Relayer Alert",
                        "text": text,
                        "ts": Utc::now().timestamp()
                    }]
                }),
            ));
        }

        if let (Some(token), Some(chat_id)) =
            (&self.config.telegram_bot_token, &self.config.telegram_chat_id)
        {
            deliveries.push((
                "telegram",
                format!("{}/bot{}/sendMessage", self.telegram_api_base, token),
                json!({
                    "chat_id": chat_id,
                    "text": text,
                    "disable_web_page_preview": true,
                }),
            ));
        }

        deliveries
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn post_with_retries(client: Client, channel: &'static str, url: String, payload: Value) {
    for attempt in 0..MAX_RETRIES {
        match client.post(&url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(channel, "Alert delivered");
                return;
            }
            Ok(resp) => {
                warn!(
                    channel,
                    "Alert send attempt {}/{} failed: {}",
                    attempt + 1,
                    MAX_RETRIES,
                    resp.status()
                );
            }
            Err(e) => {
                // reqwest errors include the URL, which may embed a token
                warn!(
                    channel,
                    "Alert send attempt {}/{} failed: {}",
                    attempt + 1,
                    MAX_RETRIES,
                    e.without_url()
                );
            }
        }

        if attempt < MAX_RETRIES - 1 {
            tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECS * (attempt as u64 + 1))).await;
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn notify(&self, notification: Notification) {
        LogNotifier.notify(notification.clone());

        let deliveries = self.deliveries(&notification);
        if deliveries.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(kind = %notification.kind, "No runtime available, alert not delivered");
            return;
        };

        let client = self.client.clone();
        let handle = runtime.spawn(async move {
            let sends = deliveries
                .into_iter()
                .map(|(channel, url, payload)| post_with_retries(client.clone(), channel, url, payload));
            futures::future::join_all(sends).await;
        });

        let mut in_flight = self.lock_in_flight();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    async fn flush(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.lock_in_flight());
        for handle in handles {
            let _ = handle.await;
        }
    }
}
