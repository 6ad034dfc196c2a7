//! Relational entities for MediChain services
//!
//! Sea-ORM entities for the ledger's block table and the treatment
//! chaincode's local store. The proto definitions remain the source of
//! truth for the shapes serialized into `blocks.transaction`.

pub mod entity;

pub use entity::{blocks, treatments};
