//! In-memory block store
//!
//! Backs single-node development and the test suite. Chain order is the
//! insertion order of the vector; the map provides hash lookups.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use proto::Block;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::store::BlockStore;

#[derive(Default)]
struct Inner {
    order: Vec<Block>,
    by_hash: HashMap<String, usize>,
}

#[derive(Default)]
pub struct MemoryBlockStore {
    inner: RwLock<Inner>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn append(&self, block: &Block) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.by_hash.contains_key(&block.hash) {
            return Err(anyhow!("Duplicate block hash {}", block.hash));
        }
        let index = inner.order.len();
        inner.by_hash.insert(block.hash.clone(), index);
        inner.order.push(block.clone());
        Ok(())
    }

    async fn get_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_hash
            .get(hash)
            .and_then(|&index| inner.order.get(index))
            .cloned())
    }

    async fn list(&self, page: u64, page_size: u64) -> Result<(Vec<Block>, u64)> {
        let inner = self.inner.read().await;
        let total = inner.order.len() as u64;
        let start = (page - 1).saturating_mul(page_size) as usize;
        let blocks = inner
            .order
            .iter()
            .skip(start)
            .take(page_size as usize)
            .cloned()
            .collect();
        Ok((blocks, total))
    }

    async fn last(&self) -> Result<Option<Block>> {
        let inner = self.inner.read().await;
        Ok(inner.order.last().cloned())
    }
}
