//! MediChain ledger service
//!
//! Append-only, hash-linked block storage with per-organization write
//! authorization. The `Ledger` engine serializes tip updates so the chain
//! can never fork under concurrent appends; the gRPC facade gates every
//! call through the contract registry.

pub mod chain;
pub mod memory;
pub mod service;
pub mod sql;
pub mod store;

pub use chain::{
    GENESIS_HASH, Ledger, LedgerError, compute_hash, validate_transaction, verify_chain,
};
pub use memory::MemoryBlockStore;
pub use service::LedgerServiceImpl;
pub use sql::SqlBlockStore;
pub use store::BlockStore;
