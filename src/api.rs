//! HTTP API
//!
//! Read-only query surface over the store plus operational endpoints:
//! - GET /health - 200 when the watcher and processor are running, 503 otherwise
//! - GET /metrics - Prometheus metrics
//! - GET /status - Watcher and relayer status
//! - GET /balances - Relayer balance per chain
//! - GET /chains - Active chain configuration (no RPC URLs)
//! - GET /events, GET /events/{tx_id} - Bridge events
//! - GET /stats?days=N - Route statistics
//!
//! Admin routes require `Authorization: Bearer <ADMIN_API_TOKEN>` and are not
//! mounted when no token is configured.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::chains::ChainRegistry;
use crate::metrics;
use crate::settlement::SettlementProcessor;
use crate::store::{EventQuery, EventStore, StatsTotals, StoreError, DEFAULT_QUERY_LIMIT};
use crate::types::{format_address, EventStatus, TxId};
use crate::watchers::EventWatcher;

const DEFAULT_STATS_DAYS: u32 = 7;
const MAX_STATS_DAYS: u32 = 365;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub watcher: Arc<EventWatcher>,
    pub processor: Arc<SettlementProcessor>,
    pub registry: Arc<ChainRegistry>,
    pub admin_token: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Conflict(String),
    Internal,
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error = %e, "Store error while serving request");
        ApiError::Internal
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .route("/balances", get(balances))
        .route("/chains", get(chains))
        .route("/events", get(list_events))
        .route("/events/{tx_id}", get(get_event))
        .route("/stats", get(stats));

    if state.admin_token.is_some() {
        app = app
            .route("/admin/events/{tx_id}/retry", post(retry_event))
            .route("/admin/services/{service}/{action}", post(control_service));
    }

    app.with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> eyre::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let admin = state.admin_token.is_some();
    let app = router(state);
    info!(addr = ?listener.local_addr().ok(), admin_routes = admin, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub async fn start_server<F>(bind: &str, state: AppState, shutdown: F) -> eyre::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| eyre::eyre!("Invalid bind address {}: {}", bind, e))?;
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await
}

async fn health(State(state): State<AppState>) -> Response {
    let event_listener = state.watcher.is_running();
    let transaction_processor = state.processor.is_running();
    let healthy = event_listener && transaction_processor;

    let body = Json(json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "services": {
            "eventListener": event_listener,
            "transactionProcessor": transaction_processor,
        },
        "timestamp": chrono::Utc::now(),
    }));

    if healthy {
        (StatusCode::OK, body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

async fn prometheus_metrics() -> Response {
    match metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

async fn status(State(state): State<AppState>) -> Response {
    Json(json!({
        "relayer": state.processor.status(),
        "watcher": state.watcher.status(),
    }))
    .into_response()
}

async fn balances(State(state): State<AppState>) -> Response {
    Json(state.processor.all_balances().await).into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChainInfo {
    chain_id: u64,
    name: String,
    bridge_address: String,
    min_confirmations: u64,
    gas_limit: u64,
    max_gas_price_wei: String,
    block_time_ms: u128,
}

async fn chains(State(state): State<AppState>) -> Json<Vec<ChainInfo>> {
    Json(
        state
            .registry
            .descriptors()
            .map(|d| ChainInfo {
                chain_id: d.chain_id,
                name: d.name.clone(),
                bridge_address: format_address(&d.bridge_address),
                min_confirmations: d.min_confirmations,
                gas_limit: d.gas_limit,
                max_gas_price_wei: d.max_gas_price_wei.to_string(),
                block_time_ms: d.block_time.as_millis(),
            })
            .collect(),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsParams {
    status: Option<String>,
    source_chain: Option<u64>,
    target_chain: Option<u64>,
    limit: Option<u32>,
}

async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> ApiResult<Response> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<EventStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let query = EventQuery {
        status,
        source_chain: params.source_chain,
        target_chain: params.target_chain,
        limit: params.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
    };
    let events = state.store.recent_events(&query).await?;
    Ok(Json(events).into_response())
}

fn parse_tx_id(raw: &str) -> ApiResult<TxId> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid transaction id: {}", raw)))
}

async fn get_event(
    State(state): State<AppState>,
    Path(tx_id): Path<String>,
) -> ApiResult<Response> {
    let tx_id = parse_tx_id(&tx_id)?;
    match state.store.get_event(tx_id).await? {
        Some(event) => Ok(Json(event).into_response()),
        None => Err(ApiError::NotFound("Event not found".to_string())),
    }
}

#[derive(Debug, Default, Deserialize)]
struct StatsParams {
    days: Option<u32>,
}

async fn stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> ApiResult<Response> {
    let days = params
        .days
        .unwrap_or(DEFAULT_STATS_DAYS)
        .clamp(1, MAX_STATS_DAYS);
    let routes = state.store.route_stats(days).await?;
    let totals = StatsTotals::from_routes(&routes)?;

    Ok(Json(json!({
        "period": format!("{}d", days),
        "totals": totals,
        "successRate": totals.success_rate(),
        "byRoute": routes,
    }))
    .into_response())
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(token) = state.admin_token.as_deref() else {
        return Err(ApiError::Unauthorized);
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(p) if tokens_match(p, token) => Ok(()),
        _ => {
            warn!("Rejected admin request with missing or invalid token");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Constant-time token comparison. Only the length can leak.
fn tokens_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Reset a failed event to confirmed so the next cycle settles it again
async fn retry_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tx_id): Path<String>,
) -> ApiResult<Response> {
    require_admin(&state, &headers)?;
    let tx_id = parse_tx_id(&tx_id)?;

    let Some(event) = state.store.get_event(tx_id).await? else {
        return Err(ApiError::NotFound("Event not found".to_string()));
    };
    if !state.store.reset_failed(tx_id).await? {
        return Err(ApiError::Conflict(format!(
            "Event is {}, only failed events can be retried",
            event.status
        )));
    }

    info!(tx_id = %tx_id, "Failed event reset for retry");
    Ok(Json(json!({
        "txId": tx_id,
        "status": EventStatus::Confirmed,
    }))
    .into_response())
}

async fn control_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((service, action)): Path<(String, String)>,
) -> ApiResult<Response> {
    require_admin(&state, &headers)?;

    match (service.as_str(), action.as_str()) {
        ("event-listener", "start") => state.watcher.start(),
        ("event-listener", "stop") => state.watcher.stop().await,
        ("transaction-processor", "start") => state.processor.start(),
        ("transaction-processor", "stop") => state.processor.stop().await,
        ("event-listener" | "transaction-processor", _) => {
            return Err(ApiError::BadRequest(format!("Unknown action: {}", action)));
        }
        _ => return Err(ApiError::NotFound(format!("Unknown service: {}", service))),
    }

    info!(service = %service, action = %action, "Service control request handled");
    let running = match service.as_str() {
        "event-listener" => state.watcher.is_running(),
        _ => state.processor.is_running(),
    };
    Ok(Json(json!({ "service": service, "running": running })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChainConnections;
    use crate::config::{ProcessorConfig, WatcherConfig};
    use crate::store::MemoryStore;
    use crate::testing::{descriptor, tx_id, FakeChain, RecordingNotifier};
    use crate::types::{EventKind, NewBridgeEvent};
    use alloy::primitives::{Address, B256, U256};
    use serde_json::Value;

    struct TestServer {
        base: String,
        store: Arc<MemoryStore>,
        shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            if let Some(tx) = self.shutdown.take() {
                let _ = tx.send(());
            }
        }
    }

    async fn spawn_server(admin_token: Option<&str>) -> TestServer {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let registry = Arc::new(ChainRegistry::from_descriptors([
            descriptor(1, 0),
            descriptor(56, 0),
        ]));
        let mut connections = ChainConnections::new();
        connections.insert(Arc::new(FakeChain::new(1)));
        connections.insert(Arc::new(FakeChain::new(56)));

        let watcher = Arc::new(EventWatcher::with_connections(
            registry.clone(),
            connections.clone(),
            store.clone(),
            notifier.clone(),
            WatcherConfig::default(),
        ));
        let processor = Arc::new(SettlementProcessor::with_connections(
            registry.clone(),
            connections,
            store.clone(),
            notifier,
            Address::repeat_byte(0x11),
            ProcessorConfig::default(),
        ));
        let state = AppState {
            store: store.clone(),
            watcher,
            processor,
            registry,
            admin_token: admin_token.map(str::to_string),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(serve(listener, state, async {
            let _ = rx.await;
        }));

        TestServer {
            base: format!("http://{}", addr),
            store,
            shutdown: Some(tx),
        }
    }

    async fn seed(store: &MemoryStore, id: &str, source_chain: u64, target_chain: u64) {
        store
            .upsert_event(&NewBridgeEvent {
                tx_id: tx_id(id),
                kind: EventKind::Locked,
                source_chain,
                target_chain,
                user_address: Address::repeat_byte(0xaa),
                token_address: Address::repeat_byte(0xbb),
                amount: U256::from(1_000u64),
                target_address: Address::repeat_byte(0xcc),
                block_number: 10,
                transaction_hash: B256::ZERO,
                confirmations: 0,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_health_unavailable_when_stopped() {
        let server = spawn_server(None).await;
        let resp = reqwest::get(format!("{}/health", server.base)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["services"]["eventListener"], false);
    }

    #[tokio::test]
    async fn test_event_lookup() {
        let server = spawn_server(None).await;
        seed(&server.store, "0xabc", 1, 56).await;

        let resp = reqwest::get(format!("{}/events/0xabc", server.base)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "pending");
        assert_eq!(body["amount"], "1000");
        assert_eq!(body["targetChain"], 56);

        let missing = reqwest::get(format!("{}/events/0xdef", server.base)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let invalid = reqwest::get(format!("{}/events/not-hex", server.base)).await.unwrap();
        assert_eq!(invalid.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_event_filters() {
        let server = spawn_server(None).await;
        seed(&server.store, "0x1", 1, 56).await;
        seed(&server.store, "0x2", 56, 1).await;

        let body: Value = reqwest::get(format!("{}/events?sourceChain=56", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let events = body.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["sourceChain"], 56);

        let bad = reqwest::get(format!("{}/events?status=sideways", server.base))
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_and_chains() {
        let server = spawn_server(None).await;
        seed(&server.store, "0x1", 1, 56).await;
        seed(&server.store, "0x2", 1, 56).await;

        let body: Value = reqwest::get(format!("{}/stats", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["period"], "7d");
        assert_eq!(body["totals"]["totalEvents"], 2);
        assert_eq!(body["totals"]["totalVolume"], "2000");

        let chains: Value = reqwest::get(format!("{}/chains", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(chains.as_array().unwrap().len(), 2);
        assert!(chains[0].get("rpcUrl").is_none());
    }

    #[tokio::test]
    async fn test_admin_routes_absent_without_token() {
        let server = spawn_server(None).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/admin/events/0x1/retry", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_retry_resets_failed_event() {
        let server = spawn_server(Some("secret")).await;
        seed(&server.store, "0x1", 1, 56).await;
        let client = reqwest::Client::new();
        let url = format!("{}/admin/events/0x1/retry", server.base);

        let unauthorized = client.post(&url).send().await.unwrap();
        assert_eq!(unauthorized.status(), reqwest::StatusCode::UNAUTHORIZED);

        // Pending events cannot be retried
        let conflict = client.post(&url).bearer_auth("secret").send().await.unwrap();
        assert_eq!(conflict.status(), reqwest::StatusCode::CONFLICT);

        server
            .store
            .set_status(tx_id("0x1"), EventStatus::Failed, None, Some("boom"))
            .await
            .unwrap();
        let ok = client.post(&url).bearer_auth("secret").send().await.unwrap();
        assert_eq!(ok.status(), reqwest::StatusCode::OK);

        let event = server.store.get_event(tx_id("0x1")).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Confirmed);
        assert!(event.error_message.is_none());
    }

    #[test]
    fn test_admin_token_comparison() {
        assert!(tokens_match("secret", "secret"));
        assert!(!tokens_match("secreT", "secret"));
        assert!(!tokens_match("secret-longer", "secret"));
        assert!(!tokens_match("sec", "secret"));
        assert!(!tokens_match("", "secret"));
    }

    #[tokio::test]
    async fn test_admin_rejects_wrong_token() {
        let server = spawn_server(Some("secret")).await;
        seed(&server.store, "0x1", 1, 56).await;
        server
            .store
            .set_status(tx_id("0x1"), EventStatus::Failed, None, Some("boom"))
            .await
            .unwrap();
        let client = reqwest::Client::new();
        let url = format!("{}/admin/events/0x1/retry", server.base);

        for token in ["secreT", "secret2", "secre"] {
            let resp = client.post(&url).bearer_auth(token).send().await.unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
        }
        let event = server.store.get_event(tx_id("0x1")).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Failed);
    }

    #[tokio::test]
    async fn test_admin_service_control() {
        let server = spawn_server(Some("secret")).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/admin/services/transaction-processor/start", server.base))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["running"], true);

        let unknown = client
            .post(format!("{}/admin/services/nope/start", server.base))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);

        let stop = client
            .post(format!("{}/admin/services/transaction-processor/stop", server.base))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap();
        let body: Value = stop.json().await.unwrap();
        assert_eq!(body["running"], false);
    }
}
