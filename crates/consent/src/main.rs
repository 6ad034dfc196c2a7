use std::env;
use std::sync::Arc;

use anyhow::Result;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tracing::{info, warn};

use auth::AuthVerifier;
use consent::{
    ConsentEngine, GrantStore, MemoryGrantStore, Notifier, PatientPermissionServiceImpl,
    RedisGrantStore,
};
use ledger_client::{LedgerClient, LedgerClientConfig};
use proto::Actor;
use proto::patient_permission_service_server::PatientPermissionServiceServer;

const ADMIN_TOKEN_DURATION_SECS: u64 = 300;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    println!("🚀 Starting MediChain consent service");

    monitoring::init_logging("consent")?;
    info!("✅ Logging initialized");

    monitoring::init_metrics()?;

    let server_address = env::var("SERVER_ADDRESS")
        .unwrap_or_else(|_| "0.0.0.0:50062".to_string())
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid SERVER_ADDRESS format: {}", e))?;

    let metrics_addr = env::var("METRICS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9092".to_string())
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid METRICS_ADDR format: {}", e))?;

    let verifier = AuthVerifier::from_env()?;

    let grant_base_url = env::var("GRANT_BASE_URL")
        .map_err(|_| anyhow::anyhow!("GRANT_BASE_URL environment variable must be set"))?;

    let notification_addr = env::var("NOTIFICATION_ADDR")
        .unwrap_or_else(|_| "http://127.0.0.1:50063".to_string());

    // TLS configuration
    let tls_cert_path = env::var("TLS_CERT_PATH");
    let tls_key_path = env::var("TLS_KEY_PATH");
    let enable_tls = tls_cert_path.is_ok() && tls_key_path.is_ok();

    let store: Arc<dyn GrantStore> = match env::var("REDIS_URL") {
        Ok(redis_url) => {
            let store = RedisGrantStore::new(&redis_url)?;
            info!("✅ Connected to consent cache");
            Arc::new(store)
        }
        Err(_) => {
            warn!("REDIS_URL not set, using in-memory grant store");
            Arc::new(MemoryGrantStore::new())
        }
    };

    let mut ledger = LedgerClient::connect(LedgerClientConfig::from_env())?;

    // Register this process's contract id so the ledger accepts its calls.
    // The registration token is short-lived; the contract id lives for the
    // life of the process.
    let admin_token = verifier.create_actor_token(
        "consent-service",
        Actor::Admin,
        "Consent Service",
        ADMIN_TOKEN_DURATION_SECS,
    )?;
    ledger.register_contract(&admin_token).await?;
    info!("✅ Contract registered with ledger");

    let notifier = Notifier::connect(&notification_addr, &grant_base_url)?;

    let engine = ConsentEngine::new(store);
    let service = PatientPermissionServiceImpl::new(engine, verifier, ledger, notifier);

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

    info!("✅ Consent service ready");

    builder
        .add_service(PatientPermissionServiceServer::new(service))
        .serve(server_address)
        .await?;

    Ok(())
}
