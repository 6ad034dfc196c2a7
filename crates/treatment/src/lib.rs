//! MediChain treatment chaincode
//!
//! Validates treatment writes from permitted hospitals, records each one as
//! a ledger transaction, and keeps a local relational copy for reads. The
//! local row commits only after the ledger append succeeds; reads are gated
//! by ownership or a patient-issued permission token.

pub mod memory;
pub mod notify;
pub mod permits;
pub mod service;
pub mod sql;
pub mod store;

pub use memory::MemoryTreatmentStore;
pub use notify::RecordNotifier;
pub use permits::{InMemoryOrgPermits, LedgerPermitSource, OrgPermits, PermitSource};
pub use service::TreatmentServiceImpl;
pub use sql::SqlTreatmentStore;
pub use store::{StoredTreatment, TreatmentStore, TreatmentTxn};
