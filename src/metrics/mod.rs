//! Prometheus metrics and the health endpoint
//!
//! Exposes metrics for:
//! - Chain tip heights and ingestion checkpoints
//! - Source and destination records per ingested block
//! - Slow nodes, inconsistent blocks and persistence failures
//! - Reconciler progress

use crate::chain::{ListenerState, ListenerStatus, StatusTable};
use crate::error::{IndexerError, IndexerResult};
use crate::models::TxStatus;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge, GaugeVec,
    TextEncoder,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref LASTEST_HEIGHT: GaugeVec = register_gauge_vec!(
        "polybridge_lastest_height",
        "Tip height reported by the primary nodes",
        &["chain_id"]
    ).unwrap();

    pub static ref WATCH_HEIGHT: GaugeVec = register_gauge_vec!(
        "polybridge_watch_height",
        "Tip height reported by the extended nodes",
        &["chain_id"]
    ).unwrap();

    pub static ref CHECKPOINT_HEIGHT: GaugeVec = register_gauge_vec!(
        "polybridge_height",
        "Last block fully ingested",
        &["chain_id"]
    ).unwrap();

    pub static ref LOCKS: GaugeVec = register_gauge_vec!(
        "polybridge_locks",
        "Source transactions recorded in the last ingested block",
        &["chain_id"]
    ).unwrap();

    pub static ref UNLOCKS: GaugeVec = register_gauge_vec!(
        "polybridge_unlocks",
        "Destination transactions recorded in the last ingested block",
        &["chain_id"]
    ).unwrap();

    // Diagnostics
    pub static ref SLOW_NODE: CounterVec = register_counter_vec!(
        "polybridge_slow_node_total",
        "Ticks where the primary node lagged behind the extended nodes",
        &["chain_id"]
    ).unwrap();

    pub static ref INCONSISTENT_BLOCKS: CounterVec = register_counter_vec!(
        "polybridge_inconsistent_block_total",
        "Blocks accepted with mismatching event counts",
        &["chain_id"]
    ).unwrap();

    pub static ref PERSIST_FAILURES: CounterVec = register_counter_vec!(
        "polybridge_persist_failures_total",
        "Failed commits of block records and checkpoint",
        &["chain_id"]
    ).unwrap();

    // Reconciler metrics
    pub static ref UNFINISHED_TRANSACTIONS: Gauge = register_gauge!(
        "polybridge_unfinished_transactions",
        "Wrapper transactions unfinished past the staleness threshold"
    ).unwrap();

    pub static ref STATUS_UPDATES: CounterVec = register_counter_vec!(
        "polybridge_status_updates_total",
        "Wrapper status changes written by the reconciler",
        &["status"]
    ).unwrap();
}

/// Prometheus metrics server, also serving listener health
pub struct MetricsServer {
    port: u16,
    statuses: StatusTable,
}

impl MetricsServer {
    pub fn new(port: u16, statuses: StatusTable) -> Self {
        Self { port, statuses }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> IndexerResult<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.statuses.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| IndexerError::Config(format!("cannot bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| IndexerError::Internal(format!("metrics server: {}", e)))
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    match String::from_utf8(buffer) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    healthy: bool,
    version: &'static str,
    listeners: Vec<ListenerStatus>,
}

/// Healthy while no listener has stopped
async fn health_handler(State(statuses): State<StatusTable>) -> impl IntoResponse {
    let response = health_snapshot(&statuses);
    let code = if response.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

fn health_snapshot(statuses: &StatusTable) -> HealthResponse {
    let mut listeners: Vec<ListenerStatus> = statuses.iter().map(|entry| entry.value().clone()).collect();
    listeners.sort_by_key(|status| status.chain_id);

    HealthResponse {
        healthy: listeners.iter().all(|status| status.state != ListenerState::Stopped),
        version: env!("CARGO_PKG_VERSION"),
        listeners,
    }
}

// Helper functions to record metrics

/// The watch height keeps its last value while the extended nodes are down
pub fn record_heights(chain_id: u64, latest: u64, extended: Option<u64>, checkpoint: u64) {
    let label = chain_id.to_string();
    LASTEST_HEIGHT.with_label_values(&[&label]).set(latest as f64);
    if let Some(extended) = extended {
        WATCH_HEIGHT.with_label_values(&[&label]).set(extended as f64);
    }
    CHECKPOINT_HEIGHT.with_label_values(&[&label]).set(checkpoint as f64);
}

pub fn record_checkpoint(chain_id: u64, checkpoint: u64) {
    CHECKPOINT_HEIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(checkpoint as f64);
}

pub fn record_block_events(chain_id: u64, locks: usize, unlocks: usize) {
    let label = chain_id.to_string();
    LOCKS.with_label_values(&[&label]).set(locks as f64);
    UNLOCKS.with_label_values(&[&label]).set(unlocks as f64);
}

pub fn record_slow_node(chain_id: u64) {
    SLOW_NODE.with_label_values(&[&chain_id.to_string()]).inc();
}

pub fn record_inconsistent_block(chain_id: u64) {
    INCONSISTENT_BLOCKS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_persist_failure(chain_id: u64) {
    PERSIST_FAILURES
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_unfinished(count: usize) {
    UNFINISHED_TRANSACTIONS.set(count as f64);
}

pub fn record_status_update(status: TxStatus) {
    STATUS_UPDATES.with_label_values(&[status.as_str()]).inc();
}
