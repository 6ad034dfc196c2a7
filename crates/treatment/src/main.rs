use std::env;
use std::sync::Arc;

use anyhow::Result;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tracing::{info, warn};

use auth::AuthVerifier;
use ledger_client::{LedgerClient, LedgerClientConfig};
use proto::Actor;
use proto::treatment_service_server::TreatmentServiceServer;
use treatment::permits::REFRESH_INTERVAL;
use treatment::{
    InMemoryOrgPermits, LedgerPermitSource, MemoryTreatmentStore, OrgPermits, PermitSource,
    RecordNotifier, SqlTreatmentStore, TreatmentServiceImpl, TreatmentStore,
};

const ADMIN_TOKEN_DURATION_SECS: u64 = 300;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    println!("🚀 Starting MediChain treatment service");

    monitoring::init_logging("treatment")?;
    info!("✅ Logging initialized");

    monitoring::init_metrics()?;

    let server_address = env::var("SERVER_ADDRESS")
        .unwrap_or_else(|_| "0.0.0.0:50064".to_string())
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid SERVER_ADDRESS format: {}", e))?;

    let metrics_addr = env::var("METRICS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9093".to_string())
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid METRICS_ADDR format: {}", e))?;

    let verifier = AuthVerifier::from_env()?;

    let notification_addr = env::var("NOTIFICATION_ADDR")
        .unwrap_or_else(|_| "http://127.0.0.1:50063".to_string());

    // TLS configuration
    let tls_cert_path = env::var("TLS_CERT_PATH");
    let tls_key_path = env::var("TLS_KEY_PATH");
    let enable_tls = tls_cert_path.is_ok() && tls_key_path.is_ok();

    let store: Arc<dyn TreatmentStore> = match env::var("DATABASE_URL") {
        Ok(database_url) => {
            let store = SqlTreatmentStore::new(&database_url)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
            info!("✅ Connected to treatment database");
            Arc::new(store)
        }
        Err(_) => {
            warn!("DATABASE_URL not set, using in-memory treatment store");
            Arc::new(MemoryTreatmentStore::new())
        }
    };

    let mut ledger = LedgerClient::connect(LedgerClientConfig::from_env())?;

    let admin_token = verifier.create_actor_token(
        "treatment-service",
        Actor::Admin,
        "Treatment Service",
        ADMIN_TOKEN_DURATION_SECS,
    )?;
    ledger.register_contract(&admin_token).await?;
    info!("✅ Contract registered with ledger");

    // Seed the hospital allow-map, then keep it refreshed from the ledger.
    let permits: Arc<dyn OrgPermits> = Arc::new(InMemoryOrgPermits::new());
    if let Ok(seed) = env::var("ALLOWED_HOSPITALS") {
        for id in seed.split(',').map(str::trim).filter(|id| !id.is_empty()) {
            permits.insert(id, id).await;
        }
        info!("✅ Hospital allow-map seeded from environment");
    }
    let source: Arc<dyn PermitSource> = Arc::new(LedgerPermitSource::new(ledger.clone()));
    match treatment::permits::refresh_once(permits.as_ref(), source.as_ref()).await {
        Ok(loaded) => info!("✅ Hospital allow-map loaded ({} ledger entries)", loaded),
        Err(e) => warn!("Initial permit scan failed, relying on refresh task: {}", e),
    }
    treatment::permits::spawn_refresh_task(permits.clone(), source, REFRESH_INTERVAL);

    let notifier = RecordNotifier::connect(&notification_addr)?;
    let service = TreatmentServiceImpl::new(store, permits, verifier, ledger, notifier);

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

    info!("✅ Treatment service ready");

    builder
        .add_service(TreatmentServiceServer::new(service))
        .serve(server_address)
        .await?;

    Ok(())
}
