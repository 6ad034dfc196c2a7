//! Authentication and authorization primitives for MediChain services
//!
//! Two kinds of credentials flow through the system:
//!
//! - **Actor tokens** - signed claims carried as `authorization: Bearer <token>`
//!   request metadata, identifying an organizational actor (patient, hospital,
//!   insurance, government, admin).
//! - **Contract ids** - per-chaincode-process write credentials carried as
//!   `contract_id` metadata and checked by the ledger against the set of
//!   registered contracts.
//!
//! Patient-scoped grant tokens are actor-token siblings with a dedicated
//! audience; they prove that a grant request URL was authorized by the
//! patient, not that the bearer is the patient in general.

pub mod claims;
pub mod contract;

pub use claims::{AuthInfo, AuthVerifier, Claims, actor_from_str, actor_label};
pub use contract::{
    CONTRACT_ID_KEY, ContractCredentials, ContractRegistry, generate_contract_id,
};
