//! Chain engine: hashing, validation and serialized tip updates

use anyhow::Result;
use prost::Message;
use proto::{Block, Operation, Transaction};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;
use tonic::Status;
use tracing::{debug, error};

use crate::store::BlockStore;

/// Previous-hash value of the first block in the chain.
pub const GENESIS_HASH: &str = "";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Block not found: {0}")]
    NotFound(String),
    #[error("Hash collision on {0}")]
    HashCollision(String),
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<LedgerError> for Status {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidTransaction(msg) => Status::invalid_argument(msg),
            LedgerError::NotFound(hash) => Status::not_found(format!("Unknown block {}", hash)),
            LedgerError::HashCollision(hash) => {
                Status::internal(format!("Hash collision on {}", hash))
            }
            LedgerError::Storage(e) => Status::internal(format!("Storage failure: {}", e)),
        }
    }
}

/// Content hash of a transaction chained to its predecessor:
/// hex(sha256(serialized transaction || previous hash)).
pub fn compute_hash(transaction: &Transaction, previous_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(transaction.encode_to_vec());
    hasher.update(previous_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Reject transactions with an unknown operation or an anonymous creator
/// before any side effect.
pub fn validate_transaction(transaction: &Transaction) -> Result<(), LedgerError> {
    if transaction.operation() == Operation::Unspecified {
        return Err(LedgerError::InvalidTransaction(
            "Transaction operation must be specified".to_string(),
        ));
    }
    let creator = transaction
        .creator
        .as_ref()
        .ok_or_else(|| LedgerError::InvalidTransaction("Transaction creator is required".to_string()))?;
    if creator.id.is_empty() {
        return Err(LedgerError::InvalidTransaction(
            "Transaction creator id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Recompute every hash and check back-references over a chain-order slice.
pub fn verify_chain(blocks: &[Block]) -> Result<(), LedgerError> {
    let mut previous = GENESIS_HASH.to_string();
    for block in blocks {
        if block.previous_hash != previous {
            return Err(LedgerError::InvalidTransaction(format!(
                "Block {} links to {} instead of {}",
                block.hash, block.previous_hash, previous
            )));
        }
        let transaction = block.transaction.as_ref().ok_or_else(|| {
            LedgerError::InvalidTransaction(format!("Block {} has no transaction", block.hash))
        })?;
        let expected = compute_hash(transaction, &block.previous_hash);
        if expected != block.hash {
            return Err(LedgerError::InvalidTransaction(format!(
                "Block {} fails hash verification",
                block.hash
            )));
        }
        previous = block.hash.clone();
    }
    Ok(())
}

struct Tip {
    hash: String,
    last_timestamp: u64,
}

/// The append-only chain engine.
///
/// All tip updates happen under a single mutex; that lock is the guarantee
/// that two concurrent appends can never claim the same predecessor.
pub struct Ledger {
    store: Arc<dyn BlockStore>,
    tip: Mutex<Tip>,
}

impl Ledger {
    /// Open the ledger, recovering the chain tip from storage.
    pub async fn open(store: Arc<dyn BlockStore>) -> Result<Self> {
        let tip = match store.last().await? {
            Some(block) => {
                debug!("Recovered chain tip {} at {}", block.hash, block.timestamp);
                Tip {
                    hash: block.hash,
                    last_timestamp: block.timestamp,
                }
            }
            None => Tip {
                hash: GENESIS_HASH.to_string(),
                last_timestamp: 0,
            },
        };
        Ok(Self {
            store,
            tip: Mutex::new(tip),
        })
    }

    /// Validate, hash, link and persist a transaction as the next block.
    pub async fn add_block(&self, transaction: Transaction) -> Result<Block, LedgerError> {
        validate_transaction(&transaction)?;

        let mut tip = self.tip.lock().await;

        let previous_hash = tip.hash.clone();
        let hash = compute_hash(&transaction, &previous_hash);

        // Defensive check only; sha256 collisions are treated as impossible.
        if self.store.get_by_hash(&hash).await?.is_some() {
            error!("Computed hash {} already exists in the store", hash);
            return Err(LedgerError::HashCollision(hash));
        }

        // Server-assigned, monotone non-decreasing across the chain.
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(tip.last_timestamp);
        let timestamp = now.max(tip.last_timestamp);

        let block = Block {
            hash: hash.clone(),
            previous_hash,
            timestamp,
            transaction: Some(transaction),
        };

        self.store.append(&block).await?;

        tip.hash = hash;
        tip.last_timestamp = timestamp;

        Ok(block)
    }

    pub async fn get_block(&self, hash: &str) -> Result<Block, LedgerError> {
        match self.store.get_by_hash(hash).await? {
            Some(block) => Ok(block),
            None => Err(LedgerError::NotFound(hash.to_string())),
        }
    }

    /// Chain-order page of blocks. Non-positive page or page size normalize
    /// to 1, mirroring list-endpoint normalization across the system.
    pub async fn list_blocks(
        &self,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<Block>, i32, u64), LedgerError> {
        let page = if page <= 0 { 1 } else { page } as u64;
        let page_size = if page_size <= 0 { 1 } else { page_size } as u64;

        let (blocks, total) = self.store.list(page, page_size).await?;

        let next_page = if page * page_size < total {
            (page + 1) as i32
        } else {
            0
        };
        Ok((blocks, next_page, total))
    }
}
