//! Storage abstraction for ledger blocks
//!
//! A backing store only needs point-lookup-by-hash and ordered scans by
//! insertion order; no update or delete is ever exposed.

use anyhow::Result;
use async_trait::async_trait;
use proto::Block;

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Append a block. The caller guarantees hash uniqueness; a store may
    /// still reject duplicates defensively.
    async fn append(&self, block: &Block) -> Result<()>;

    /// Point lookup by content hash.
    async fn get_by_hash(&self, hash: &str) -> Result<Option<Block>>;

    /// One chain-order page of blocks (1-based page) plus the total count.
    async fn list(&self, page: u64, page_size: u64) -> Result<(Vec<Block>, u64)>;

    /// The most recently appended block, if any. Used to recover the chain
    /// tip at startup.
    async fn last(&self) -> Result<Option<Block>>;
}
