//! Prometheus metrics for the DexBridge relayer
//!
//! Exposed on the API's /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    pub static ref EVENTS_OBSERVED: CounterVec = register_counter_vec!(
        "dexbridge_events_observed_total",
        "Bridge events newly recorded, by source chain and kind",
        &["chain", "kind"]
    ).unwrap();

    pub static ref WATERMARK: GaugeVec = register_gauge_vec!(
        "dexbridge_watermark_block",
        "Highest fully ingested block",
        &["chain"]
    ).unwrap();

    pub static ref SETTLEMENTS: CounterVec = register_counter_vec!(
        "dexbridge_settlements_total",
        "Settlement attempts by target chain and outcome",
        &["chain", "outcome"]
    ).unwrap();

    pub static ref SETTLEMENT_LATENCY: HistogramVec = register_histogram_vec!(
        "dexbridge_settlement_latency_seconds",
        "Time from submitting releaseTokens to a mined receipt",
        &["chain"],
        vec![1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    pub static ref PENDING_EVENTS: Gauge = register_gauge!(
        "dexbridge_pending_events",
        "Events awaiting settlement at the start of the last cycle"
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "dexbridge_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    pub static ref RELAYER_BALANCE: GaugeVec = register_gauge_vec!(
        "dexbridge_relayer_balance",
        "Relayer native balance in whole tokens",
        &["chain"]
    ).unwrap();

    pub static ref TASK_FAILURES: CounterVec = register_counter_vec!(
        "dexbridge_task_failures_total",
        "Scheduled task runs that returned an error",
        &["task"]
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "dexbridge_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

pub fn record_event_observed(chain_id: u64, kind: &str) {
    EVENTS_OBSERVED
        .with_label_values(&[chain_id.to_string().as_str(), kind])
        .inc();
}

pub fn set_watermark(chain_id: u64, block_number: u64) {
    WATERMARK
        .with_label_values(&[chain_id.to_string().as_str()])
        .set(block_number as f64);
}

/// Record a settlement outcome ("completed", "failed", "retry", "gas_too_high", ...)
pub fn record_settlement(chain_id: u64, outcome: &str) {
    SETTLEMENTS
        .with_label_values(&[chain_id.to_string().as_str(), outcome])
        .inc();
}

pub fn record_settlement_latency(chain_id: u64, seconds: f64) {
    SETTLEMENT_LATENCY
        .with_label_values(&[chain_id.to_string().as_str()])
        .observe(seconds);
}

pub fn set_pending_events(count: usize) {
    PENDING_EVENTS.set(count as f64);
}

/// Record an error
pub fn record_error(chain_id: u64, error_type: &str) {
    ERRORS
        .with_label_values(&[chain_id.to_string().as_str(), error_type])
        .inc();
}

pub fn set_relayer_balance(chain_id: u64, balance: f64) {
    RELAYER_BALANCE
        .with_label_values(&[chain_id.to_string().as_str()])
        .set(balance);
}

pub fn record_task_failure(task: &str) {
    TASK_FAILURES.with_label_values(&[task]).inc();
}

pub fn set_up(up: bool) {
    UP.set(if up { 1.0 } else { 0.0 });
}

/// Encode the default registry in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
