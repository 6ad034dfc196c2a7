//! Prometheus metrics for MediChain services
//!
//! Metrics are registered once into the default registry and recorded through
//! free functions so call sites never fail when metrics are disabled.

use anyhow::Result;
use axum::http::{StatusCode, header};
use axum::{Router, response::Response, routing::get};
use prometheus::{Encoder, HistogramVec, IntCounter, TextEncoder, register_int_counter};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{error, info};

static GRPC_REQUESTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static GRPC_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();
static LEDGER_BLOCKS_APPENDED: OnceLock<IntCounter> = OnceLock::new();
static PERMISSION_GRANTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Register all MediChain metrics. Safe to call more than once.
pub fn init_metrics() -> Result<()> {
    if GRPC_REQUESTS_TOTAL.get().is_some() {
        return Ok(());
    }

    let requests_total = register_int_counter!(
        "medichain_grpc_requests_total",
        "Total number of gRPC requests received"
    )?;
    let _ = GRPC_REQUESTS_TOTAL.set(requests_total);

    let duration = prometheus::register_histogram_vec!(
        "medichain_grpc_request_duration_seconds",
        "gRPC request duration in seconds",
        &["method", "status"]
    )?;
    let _ = GRPC_REQUEST_DURATION.set(duration);

    let blocks_appended = register_int_counter!(
        "medichain_ledger_blocks_appended_total",
        "Total number of blocks appended to the ledger"
    )?;
    let _ = LEDGER_BLOCKS_APPENDED.set(blocks_appended);

    let grants_total = register_int_counter!(
        "medichain_permission_grants_total",
        "Total number of permission grants committed"
    )?;
    let _ = PERMISSION_GRANTS_TOTAL.set(grants_total);

    info!("Metrics registered");
    Ok(())
}

/// Record a handled gRPC request with its outcome and duration.
pub fn record_grpc_request(method: &str, status: &str, duration_seconds: f64) {
    if let Some(counter) = GRPC_REQUESTS_TOTAL.get() {
        counter.inc();
    }

    if let Some(histogram) = GRPC_REQUEST_DURATION.get() {
        histogram
            .with_label_values(&[method, status])
            .observe(duration_seconds);
    }
}

/// Record a successful ledger append.
pub fn record_block_appended() {
    if let Some(counter) = LEDGER_BLOCKS_APPENDED.get() {
        counter.inc();
    }
}

/// Record a committed permission grant.
pub fn record_permission_grant() {
    if let Some(counter) = PERMISSION_GRANTS_TOTAL.get() {
        counter.inc();
    }
}

async fn metrics_handler() -> Result<Response<String>, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let body = String::from_utf8(buffer).map_err(|e| {
        error!("Metrics are not valid UTF-8: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(body)
        .map_err(|e| {
            error!("Failed to build metrics response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Serve `/metrics` and `/healthz` on the given address until the process exits.
pub async fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler));

    info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_before_init_is_noop() {
        // Recording must never panic even if init_metrics was not called.
        record_grpc_request("add_block", "success", 0.001);
        record_block_appended();
        record_permission_grant();
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics().unwrap();
        init_metrics().unwrap();
        record_grpc_request("add_block", "success", 0.002);
    }
}
