use std::env;
use std::sync::Arc;

use anyhow::Result;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tracing::{info, warn};

use auth::{AuthVerifier, ContractRegistry};
use ledger::{Ledger, LedgerServiceImpl, MemoryBlockStore, SqlBlockStore};
use ledger::store::BlockStore;
use proto::ledger_service_server::LedgerServiceServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    println!("🚀 Starting MediChain ledger service");

    monitoring::init_logging("ledger")?;
    info!("✅ Logging initialized");

    monitoring::init_metrics()?;

    let server_address = env::var("SERVER_ADDRESS")
        .unwrap_or_else(|_| "0.0.0.0:50061".to_string())
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid SERVER_ADDRESS format: {}", e))?;

    let metrics_addr = env::var("METRICS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9091".to_string())
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid METRICS_ADDR format: {}", e))?;

    let verifier = AuthVerifier::from_env()?;

    // TLS configuration
    let tls_cert_path = env::var("TLS_CERT_PATH");
    let tls_key_path = env::var("TLS_KEY_PATH");
    let enable_tls = tls_cert_path.is_ok() && tls_key_path.is_ok();

    let store: Arc<dyn BlockStore> = match env::var("DATABASE_URL") {
        Ok(database_url) => {
            let store = SqlBlockStore::new(&database_url)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
            info!("✅ Connected to ledger database");
            Arc::new(store)
        }
        Err(_) => {
            warn!("DATABASE_URL not set, using in-memory block store");
            Arc::new(MemoryBlockStore::new())
        }
    };

    let ledger = Arc::new(Ledger::open(store).await?);
    let registry = Arc::new(ContractRegistry::new());
    let service = LedgerServiceImpl::new(ledger, registry, verifier);

    info!("📡 Server address: {}", server_address);
    info!("📊 Metrics address: {}", metrics_addr);

    tokio::spawn(async move {
        if let Err(e) = monitoring::start_metrics_server(metrics_addr).await {
            warn!("Metrics server exited: {}", e);
        }
    });

    let mut builder = Server::builder();

    if enable_tls {
        let cert = tokio::fs::read(tls_cert_path?).await?;
        let key = tokio::fs::read(tls_key_path?).await?;
        let identity = Identity::from_pem(cert, key);
        builder = builder.tls_config(ServerTlsConfig::new().identity(identity))?;
        info!("🔒 TLS enabled");
    } else {
        warn!("TLS disabled, serving plaintext gRPC");
    }

    info!("✅ Ledger service ready");

    builder
        .add_service(LedgerServiceServer::new(service))
        .serve(server_address)
        .await?;

    Ok(())
}
