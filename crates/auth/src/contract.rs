//! Contract registration and per-RPC contract credentials
//!
//! A chaincode process generates one contract id for its lifetime, registers
//! it with the ledger as a super-admin action, and then attaches it to every
//! ledger call as request metadata. The ledger checks the id against its
//! registry before touching storage.

use rand::RngCore;
use std::collections::HashSet;
use std::sync::RwLock;
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::{debug, info};

/// Metadata key carrying the contract credential.
pub const CONTRACT_ID_KEY: &str = "contract_id";

/// Generate a fresh contract id for this process.
pub fn generate_contract_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Ledger-side registry of contract ids authorized to write.
#[derive(Default)]
pub struct ContractRegistry {
    contracts: RwLock<HashSet<String>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract id. Idempotent: re-registering an id is accepted
    /// and does not create a duplicate entry.
    pub fn register(&self, contract_id: &str) -> Result<(), Status> {
        if contract_id.is_empty() {
            return Err(Status::invalid_argument("Contract id must not be empty"));
        }
        let mut contracts = self
            .contracts
            .write()
            .map_err(|_| Status::internal("Contract registry lock poisoned"))?;
        if contracts.insert(contract_id.to_string()) {
            info!("Registered contract {}", contract_id);
        } else {
            debug!("Contract {} already registered", contract_id);
        }
        Ok(())
    }

    /// Authorize a call by its `contract_id` metadata.
    ///
    /// Absent metadata is NotFound, an unregistered id is PermissionDenied.
    pub fn authorize(&self, metadata: &MetadataMap) -> Result<String, Status> {
        let value = metadata
            .get(CONTRACT_ID_KEY)
            .ok_or_else(|| Status::not_found("Missing contract_id metadata"))?;
        let contract_id = value
            .to_str()
            .map_err(|_| Status::not_found("Invalid contract_id metadata"))?;
        let contracts = self
            .contracts
            .read()
            .map_err(|_| Status::internal("Contract registry lock poisoned"))?;
        if !contracts.contains(contract_id) {
            return Err(Status::permission_denied(format!(
                "Contract {} is not registered",
                contract_id
            )));
        }
        Ok(contract_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.contracts.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client-side interceptor attaching the contract id to every outbound
/// ledger call.
#[derive(Clone)]
pub struct ContractCredentials {
    contract_id: MetadataValue<tonic::metadata::Ascii>,
}

impl ContractCredentials {
    pub fn new(contract_id: &str) -> Result<Self, Status> {
        let contract_id = contract_id
            .parse()
            .map_err(|_| Status::invalid_argument("Contract id is not valid metadata"))?;
        Ok(Self { contract_id })
    }
}

impl Interceptor for ContractCredentials {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert(CONTRACT_ID_KEY, self.contract_id.clone());
        Ok(request)
    }
}
