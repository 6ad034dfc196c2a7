//! In-memory treatment store
//!
//! Staged writes live on the transaction handle and apply to the shared map
//! only at commit, mirroring the relational visibility rules.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use proto::TreatmentRecord;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::store::{StoredTreatment, TreatmentStore, TreatmentTxn};

type Rows = Arc<Mutex<HashMap<String, StoredTreatment>>>;

#[derive(Default)]
pub struct MemoryTreatmentStore {
    rows: Rows,
}

impl MemoryTreatmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

enum Op {
    Insert(TreatmentRecord),
    Update(TreatmentRecord),
    SetBlockHash(String, String),
}

pub struct MemoryTreatmentTxn {
    rows: Rows,
    staged: Vec<Op>,
}

fn lock(rows: &Rows) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredTreatment>>> {
    rows.lock()
        .map_err(|_| anyhow!("treatment store lock poisoned"))
}

#[async_trait]
impl TreatmentTxn for MemoryTreatmentTxn {
    async fn insert(&mut self, record: &TreatmentRecord) -> Result<()> {
        if lock(&self.rows)?.contains_key(&record.id) {
            return Err(anyhow!("Treatment {} already exists", record.id));
        }
        self.staged.push(Op::Insert(record.clone()));
        Ok(())
    }

    async fn update(&mut self, record: &TreatmentRecord) -> Result<u64> {
        if !lock(&self.rows)?.contains_key(&record.id) {
            return Ok(0);
        }
        self.staged.push(Op::Update(record.clone()));
        Ok(1)
    }

    async fn set_block_hash(&mut self, treatment_id: &str, block_hash: &str) -> Result<()> {
        self.staged.push(Op::SetBlockHash(
            treatment_id.to_string(),
            block_hash.to_string(),
        ));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut rows = lock(&self.rows)?;
        for op in self.staged {
            match op {
                Op::Insert(record) => {
                    rows.insert(
                        record.id.clone(),
                        StoredTreatment {
                            record,
                            block_hash: String::new(),
                        },
                    );
                }
                Op::Update(record) => {
                    if let Some(stored) = rows.get_mut(&record.id) {
                        stored.record.description = record.description;
                        stored.record.medication = record.medication;
                        stored.record.date = record.date;
                    }
                }
                Op::SetBlockHash(id, hash) => {
                    if let Some(stored) = rows.get_mut(&id) {
                        stored.block_hash = hash;
                    }
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Staged ops are simply dropped.
        Ok(())
    }
}

#[async_trait]
impl TreatmentStore for MemoryTreatmentStore {
    async fn begin(&self) -> Result<Box<dyn TreatmentTxn>> {
        Ok(Box::new(MemoryTreatmentTxn {
            rows: self.rows.clone(),
            staged: Vec::new(),
        }))
    }

    async fn get(&self, treatment_id: &str) -> Result<Option<StoredTreatment>> {
        Ok(lock(&self.rows)?.get(treatment_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> TreatmentRecord {
        TreatmentRecord {
            id: id.to_string(),
            patient_id: "pat-1".to_string(),
            hospital_id: "hosp-1".to_string(),
            description: "Annual checkup".to_string(),
            medication: "None".to_string(),
            date: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryTreatmentStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.insert(&record("t-1")).await.unwrap();
        assert!(store.get("t-1").await.unwrap().is_none());

        txn.commit().await.unwrap();
        assert!(store.get("t-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryTreatmentStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.insert(&record("t-1")).await.unwrap();
        txn.rollback().await.unwrap();
        assert!(store.get("t-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_reports_missing_rows() {
        let store = MemoryTreatmentStore::new();
        let mut txn = store.begin().await.unwrap();
        assert_eq!(txn.update(&record("t-404")).await.unwrap(), 0);
    }
}
