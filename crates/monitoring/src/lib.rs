//! # MediChain Monitoring
//!
//! Shared observability for the MediChain services: tracing/logging setup,
//! Prometheus metrics for the gRPC surface and an HTTP endpoint exposing
//! them.
//!
//! ## Available Metrics
//!
//! - `medichain_grpc_requests_total` - Total gRPC requests
//! - `medichain_grpc_request_duration_seconds` - Request duration histogram
//! - `medichain_ledger_blocks_appended_total` - Blocks appended to the ledger
//! - `medichain_permission_grants_total` - Permission grants committed

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{
    init_metrics, record_block_appended, record_grpc_request, record_permission_grant,
    start_metrics_server,
};
