//! Local treatment store behind a transaction seam
//!
//! The chaincode stages its local write in a transaction, appends the
//! ledger block, and only then commits. Any error path rolls back, so the
//! local copy never holds a record the ledger does not.

use anyhow::Result;
use async_trait::async_trait;
use proto::TreatmentRecord;

/// A treatment row together with the hash of the ledger block recording it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTreatment {
    pub record: TreatmentRecord,
    pub block_hash: String,
}

/// An open local transaction. Nothing staged here is visible to readers
/// until `commit`.
#[async_trait]
pub trait TreatmentTxn: Send {
    async fn insert(&mut self, record: &TreatmentRecord) -> Result<()>;

    /// Update mutable fields of an existing record; returns the number of
    /// rows affected (0 when the record does not exist).
    async fn update(&mut self, record: &TreatmentRecord) -> Result<u64>;

    /// Attach the ledger block hash once the append has succeeded.
    async fn set_block_hash(&mut self, treatment_id: &str, block_hash: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait TreatmentStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn TreatmentTxn>>;
    async fn get(&self, treatment_id: &str) -> Result<Option<StoredTreatment>>;
}
