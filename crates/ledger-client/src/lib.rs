//! Chaincode-side client for the MediChain ledger service
//!
//! Connects lazily so calls queue until the ledger becomes reachable
//! rather than failing fast, and attaches the chaincode's contract id to
//! every call as per-RPC credentials. Callers should apply their own
//! deadlines around ledger calls.

use tonic::Request;
use tonic::codegen::InterceptedService;
use tonic::transport::{Channel, Endpoint};
use tracing::info;

use auth::ContractCredentials;
use proto::ledger_service_client::LedgerServiceClient;
use proto::{
    AddBlockRequest, Block, GetBlockRequest, ListBlocksRequest, ListBlocksResponse,
    RegisterContractRequest, Transaction,
};

#[derive(thiserror::Error, Debug)]
pub enum LedgerClientError {
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Configuration for the ledger client
#[derive(Debug, Clone)]
pub struct LedgerClientConfig {
    /// Ledger endpoint, e.g. "http://ledger:50061"
    pub endpoint: String,
    /// Per-process contract credential attached to every call.
    pub contract_id: String,
}

impl LedgerClientConfig {
    pub fn new(endpoint: impl Into<String>, contract_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            contract_id: contract_id.into(),
        }
    }

    /// Read `LEDGER_ADDR` from the environment and generate a fresh
    /// process-lifetime contract id.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let endpoint =
            std::env::var("LEDGER_ADDR").unwrap_or_else(|_| "http://127.0.0.1:50061".to_string());
        Self {
            endpoint,
            contract_id: auth::generate_contract_id(),
        }
    }
}

type AuthorizedClient = LedgerServiceClient<InterceptedService<Channel, ContractCredentials>>;

/// Ledger client carrying contract credentials on every call.
#[derive(Clone)]
pub struct LedgerClient {
    inner: AuthorizedClient,
    contract_id: String,
}

impl LedgerClient {
    /// Create a client. The channel is lazy: the connection is established
    /// on first use and calls wait for the ledger to become ready.
    pub fn connect(config: LedgerClientConfig) -> Result<Self, LedgerClientError> {
        info!("Connecting to ledger service at: {}", config.endpoint);

        let channel = Endpoint::from_shared(config.endpoint.clone())?.connect_lazy();
        let credentials = ContractCredentials::new(&config.contract_id)?;
        let inner = LedgerServiceClient::with_interceptor(channel, credentials);

        Ok(Self {
            inner,
            contract_id: config.contract_id,
        })
    }

    /// Register this process's contract id, authenticated as a super admin.
    /// Called once at chaincode startup; safe to retry.
    pub async fn register_contract(&mut self, admin_token: &str) -> Result<(), LedgerClientError> {
        let mut request = Request::new(RegisterContractRequest {
            contract_id: self.contract_id.clone(),
        });
        request.metadata_mut().insert(
            "authorization",
            format!("Bearer {}", admin_token)
                .parse()
                .map_err(|_| LedgerClientError::InvalidResponse("Invalid admin token".into()))?,
        );
        self.inner.register_contract(request).await?;
        info!("Registered contract {}", self.contract_id);
        Ok(())
    }

    /// Record a transaction on the ledger and return the appended block.
    pub async fn add_block(&mut self, transaction: Transaction) -> Result<Block, LedgerClientError> {
        let response = self
            .inner
            .add_block(Request::new(AddBlockRequest {
                transaction: Some(transaction),
            }))
            .await?
            .into_inner();
        response
            .block
            .ok_or_else(|| LedgerClientError::InvalidResponse("AddBlock returned no block".into()))
    }

    pub async fn get_block(&mut self, hash: &str) -> Result<Block, LedgerClientError> {
        let response = self
            .inner
            .get_block(Request::new(GetBlockRequest {
                hash: hash.to_string(),
            }))
            .await?
            .into_inner();
        response
            .block
            .ok_or_else(|| LedgerClientError::InvalidResponse("GetBlock returned no block".into()))
    }

    pub async fn list_blocks(
        &mut self,
        page: i32,
        page_size: i32,
    ) -> Result<ListBlocksResponse, LedgerClientError> {
        let response = self
            .inner
            .list_blocks(Request::new(ListBlocksRequest { page, page_size }))
            .await?
            .into_inner();
        Ok(response)
    }
}
