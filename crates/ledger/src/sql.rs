//! Sea-ORM block store
//!
//! Blocks are stored in an insert-only table; the auto-increment `seq`
//! column carries chain order, the unique `hash` column serves point
//! lookups. Transactions are persisted as their prost encoding so the
//! proto definitions stay the single source of truth.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use db::blocks;
use prost::Message;
use proto::{Block, Transaction};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use tracing::info;

use crate::store::BlockStore;

pub struct SqlBlockStore {
    connection: DatabaseConnection,
}

impl SqlBlockStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Connecting to ledger database...");
        let connection = Database::connect(database_url).await?;
        info!("Successfully connected to ledger database");
        Ok(Self { connection })
    }

    fn to_block(model: blocks::Model) -> Result<Block> {
        let transaction = Transaction::decode(model.transaction.as_slice())
            .map_err(|e| anyhow!("Failed to decode stored transaction: {}", e))?;
        Ok(Block {
            hash: model.hash,
            previous_hash: model.previous_hash,
            timestamp: model.timestamp as u64,
            transaction: Some(transaction),
        })
    }
}

#[async_trait]
impl BlockStore for SqlBlockStore {
    async fn append(&self, block: &Block) -> Result<()> {
        let transaction = block
            .transaction
            .as_ref()
            .ok_or_else(|| anyhow!("Block {} has no transaction", block.hash))?;

        let model = blocks::ActiveModel {
            hash: Set(block.hash.clone()),
            previous_hash: Set(block.previous_hash.clone()),
            timestamp: Set(block.timestamp as i64),
            transaction: Set(transaction.encode_to_vec()),
            ..Default::default()
        };
        model
            .insert(&self.connection)
            .await
            .map_err(|e| anyhow!("Failed to insert block {}: {}", block.hash, e))?;
        Ok(())
    }

    async fn get_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        let model = blocks::Entity::find()
            .filter(blocks::Column::Hash.eq(hash))
            .one(&self.connection)
            .await
            .map_err(|e| anyhow!("Failed to query block {}: {}", hash, e))?;
        model.map(Self::to_block).transpose()
    }

    async fn list(&self, page: u64, page_size: u64) -> Result<(Vec<Block>, u64)> {
        let paginator = blocks::Entity::find()
            .order_by_asc(blocks::Column::Seq)
            .paginate(&self.connection, page_size);

        let total = paginator
            .num_items()
            .await
            .map_err(|e| anyhow!("Failed to count blocks: {}", e))?;
        let models = paginator
            .fetch_page(page - 1)
            .await
            .map_err(|e| anyhow!("Failed to list blocks: {}", e))?;

        let blocks = models
            .into_iter()
            .map(Self::to_block)
            .collect::<Result<Vec<_>>>()?;
        Ok((blocks, total))
    }

    async fn last(&self) -> Result<Option<Block>> {
        let model = blocks::Entity::find()
            .order_by_desc(blocks::Column::Seq)
            .one(&self.connection)
            .await
            .map_err(|e| anyhow!("Failed to query chain tip: {}", e))?;
        model.map(Self::to_block).transpose()
    }
}
