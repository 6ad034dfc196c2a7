//! Logging configuration and initialization for MediChain services
//!
//! Provides centralized logging with:
//! - Console logging by default, daily rotating file logging when LOG_DIR is set
//! - Environment variable configuration (RUST_LOG)
//! - Safe error handling for logging setup

use anyhow::Result;
use std::env;
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging for a service.
///
/// When `LOG_DIR` is set, logs are written to a daily-rotating file named
/// `<service>.<date>` in that directory in addition to stdout. The filter is
/// taken from `RUST_LOG`, defaulting to `info`.
pub fn init_logging(service: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match env::var("LOG_DIR") {
        Ok(dir) => {
            let file_appender = rolling::daily(&dir, service);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(file_appender),
                )
                .init();
            info!("Logging initialized for {} (file output in {})", service, dir);
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            info!("Logging initialized for {}", service);
        }
    }

    Ok(())
}
