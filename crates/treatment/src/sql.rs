//! Sea-ORM treatment store
//!
//! The row is inserted inside an explicit database transaction; the caller
//! commits after the ledger append succeeds and rolls back otherwise, so a
//! ledger failure leaves no local trace.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use db::treatments;
use proto::TreatmentRecord;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use tracing::info;

use crate::store::{StoredTreatment, TreatmentStore, TreatmentTxn};

pub struct SqlTreatmentStore {
    connection: DatabaseConnection,
}

impl SqlTreatmentStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Connecting to treatment database...");
        let connection = Database::connect(database_url).await?;
        info!("Successfully connected to treatment database");
        Ok(Self { connection })
    }

    fn to_stored(model: treatments::Model) -> StoredTreatment {
        StoredTreatment {
            record: TreatmentRecord {
                id: model.id,
                patient_id: model.patient_id,
                hospital_id: model.hospital_id,
                description: model.description,
                medication: model.medication,
                date: model.date as u64,
            },
            block_hash: model.block_hash,
        }
    }
}

pub struct SqlTreatmentTxn {
    txn: DatabaseTransaction,
}

#[async_trait]
impl TreatmentTxn for SqlTreatmentTxn {
    async fn insert(&mut self, record: &TreatmentRecord) -> Result<()> {
        let now = Utc::now();
        let model = treatments::ActiveModel {
            id: Set(record.id.clone()),
            patient_id: Set(record.patient_id.clone()),
            hospital_id: Set(record.hospital_id.clone()),
            description: Set(record.description.clone()),
            medication: Set(record.medication.clone()),
            date: Set(record.date as i64),
            block_hash: Set(String::new()),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
        };
        model
            .insert(&self.txn)
            .await
            .map_err(|e| anyhow!("Failed to insert treatment {}: {}", record.id, e))?;
        Ok(())
    }

    async fn update(&mut self, record: &TreatmentRecord) -> Result<u64> {
        let result = treatments::Entity::update_many()
            .set(treatments::ActiveModel {
                description: Set(record.description.clone()),
                medication: Set(record.medication.clone()),
                date: Set(record.date as i64),
                updated_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .filter(treatments::Column::Id.eq(record.id.as_str()))
            .exec(&self.txn)
            .await
            .map_err(|e| anyhow!("Failed to update treatment {}: {}", record.id, e))?;
        Ok(result.rows_affected)
    }

    async fn set_block_hash(&mut self, treatment_id: &str, block_hash: &str) -> Result<()> {
        treatments::Entity::update_many()
            .set(treatments::ActiveModel {
                block_hash: Set(block_hash.to_string()),
                ..Default::default()
            })
            .filter(treatments::Column::Id.eq(treatment_id))
            .exec(&self.txn)
            .await
            .map_err(|e| anyhow!("Failed to set block hash for {}: {}", treatment_id, e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn
            .commit()
            .await
            .map_err(|e| anyhow!("Failed to commit treatment transaction: {}", e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn
            .rollback()
            .await
            .map_err(|e| anyhow!("Failed to roll back treatment transaction: {}", e))
    }
}

#[async_trait]
impl TreatmentStore for SqlTreatmentStore {
    async fn begin(&self) -> Result<Box<dyn TreatmentTxn>> {
        let txn = self
            .connection
            .begin()
            .await
            .map_err(|e| anyhow!("Failed to begin treatment transaction: {}", e))?;
        Ok(Box::new(SqlTreatmentTxn { txn }))
    }

    async fn get(&self, treatment_id: &str) -> Result<Option<StoredTreatment>> {
        let model = treatments::Entity::find_by_id(treatment_id)
            .one(&self.connection)
            .await
            .map_err(|e| anyhow!("Failed to query treatment {}: {}", treatment_id, e))?;
        Ok(model.map(Self::to_stored))
    }
}
