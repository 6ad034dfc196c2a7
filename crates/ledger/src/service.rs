//! gRPC facade over the chain engine
//!
//! Every RPC except RegisterContract is gated by the contract registry.
//! RegisterContract bypasses that gate but requires super-admin claims.
//! Handler bodies run under catch_unwind so a panic surfaces as an
//! Internal status instead of tearing down the process.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};
use tracing::{debug, error, warn};

use auth::{AuthVerifier, ContractRegistry};
use monitoring::{record_block_appended, record_grpc_request};
use proto::{
    AddBlockRequest, AddBlockResponse, GetBlockRequest, GetBlockResponse, ListBlocksRequest,
    ListBlocksResponse, RegisterContractRequest, RegisterContractResponse,
    ledger_service_server::LedgerService,
};

use crate::chain::Ledger;

pub struct LedgerServiceImpl {
    ledger: Arc<Ledger>,
    registry: Arc<ContractRegistry>,
    verifier: AuthVerifier,
}

impl LedgerServiceImpl {
    pub fn new(ledger: Arc<Ledger>, registry: Arc<ContractRegistry>, verifier: AuthVerifier) -> Self {
        Self {
            ledger,
            registry,
            verifier,
        }
    }
}

/// Run a handler body, converting a panic into an Internal status.
async fn recovered<T, F>(operation: &str, body: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            error!("Handler for {} panicked", operation);
            Err(Status::internal(format!(
                "Internal failure while handling {}",
                operation
            )))
        }
    }
}

#[tonic::async_trait]
impl LedgerService for LedgerServiceImpl {
    async fn register_contract(
        &self,
        request: Request<RegisterContractRequest>,
    ) -> Result<Response<RegisterContractResponse>, Status> {
        let start_time = Instant::now();

        // Registration is the one RPC outside the contract gate; it is a
        // super-admin action instead.
        let admin = self.verifier.require_super_admin(request.metadata())?;
        let req = request.into_inner();

        debug!(
            "Contract registration for {} requested by admin {}",
            req.contract_id, admin.id
        );

        let result = self.registry.register(&req.contract_id);
        let status = if result.is_ok() { "success" } else { "error" };
        record_grpc_request(
            "register_contract",
            status,
            start_time.elapsed().as_secs_f64(),
        );
        result?;

        Ok(Response::new(RegisterContractResponse {
            success: true,
            message: format!("Contract {} registered", req.contract_id),
        }))
    }

    async fn add_block(
        &self,
        request: Request<AddBlockRequest>,
    ) -> Result<Response<AddBlockResponse>, Status> {
        let start_time = Instant::now();
        let contract_id = self.registry.authorize(request.metadata())?;
        let req = request.into_inner();

        let transaction = req
            .transaction
            .ok_or_else(|| Status::invalid_argument("Transaction cannot be empty"))?;

        debug!(
            "AddBlock from contract {} for operation {:?}",
            contract_id,
            transaction.operation()
        );

        let result = recovered("add_block", async {
            self.ledger
                .add_block(transaction)
                .await
                .map_err(Status::from)
        })
        .await;

        match result {
            Ok(block) => {
                record_block_appended();
                record_grpc_request("add_block", "success", start_time.elapsed().as_secs_f64());
                Ok(Response::new(AddBlockResponse { block: Some(block) }))
            }
            Err(status) => {
                warn!("Failed to add block: {}", status.message());
                record_grpc_request("add_block", "error", start_time.elapsed().as_secs_f64());
                Err(status)
            }
        }
    }

    async fn get_block(
        &self,
        request: Request<GetBlockRequest>,
    ) -> Result<Response<GetBlockResponse>, Status> {
        let start_time = Instant::now();
        self.registry.authorize(request.metadata())?;
        let req = request.into_inner();

        if req.hash.is_empty() {
            return Err(Status::invalid_argument("Block hash is required"));
        }

        let result = recovered("get_block", async {
            self.ledger.get_block(&req.hash).await.map_err(Status::from)
        })
        .await;

        match result {
            Ok(block) => {
                record_grpc_request("get_block", "success", start_time.elapsed().as_secs_f64());
                Ok(Response::new(GetBlockResponse { block: Some(block) }))
            }
            Err(status) => {
                record_grpc_request("get_block", "error", start_time.elapsed().as_secs_f64());
                Err(status)
            }
        }
    }

    async fn list_blocks(
        &self,
        request: Request<ListBlocksRequest>,
    ) -> Result<Response<ListBlocksResponse>, Status> {
        let start_time = Instant::now();
        self.registry.authorize(request.metadata())?;
        let req = request.into_inner();

        let result = recovered("list_blocks", async {
            self.ledger
                .list_blocks(req.page, req.page_size)
                .await
                .map_err(Status::from)
        })
        .await;

        match result {
            Ok((blocks, next_page, total_count)) => {
                debug!(
                    "Listing {} of {} blocks (page {})",
                    blocks.len(),
                    total_count,
                    req.page
                );
                record_grpc_request("list_blocks", "success", start_time.elapsed().as_secs_f64());
                Ok(Response::new(ListBlocksResponse {
                    blocks,
                    next_page,
                    total_count,
                }))
            }
            Err(status) => {
                error!("Failed to list blocks: {}", status.message());
                record_grpc_request("list_blocks", "error", start_time.elapsed().as_secs_f64());
                Err(status)
            }
        }
    }
}
