//! In-memory block store shard
//!
//! Keys are the recomputed hash of each payload, so storing the same
//! content twice is a no-op. Blocks are never evicted.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::trace;

use crate::block::Block;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::service::BlockStoreService;

#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<ContentHash, Bytes>,
}

impl MemoryBlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blocks stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[async_trait]
impl BlockStoreService for MemoryBlockStore {
    async fn get_block(&self, hash: &ContentHash) -> Result<Block> {
        self.blocks
            .get(hash)
            .map(|data| Block::new(data.value().clone()))
            .ok_or(Error::NotFound(*hash))
    }

    async fn put_block(&self, block: Block) -> Result<ContentHash> {
        let hash = block.hash();
        self.blocks.entry(hash).or_insert(block.data);
        trace!(%hash, "stored block");
        Ok(hash)
    }

    async fn missing_blocks(&self, hashes: &[ContentHash]) -> Result<Vec<ContentHash>> {
        Ok(hashes
            .iter()
            .filter(|h| !self.blocks.contains_key(*h))
            .copied()
            .collect())
    }

    async fn get_all_block_hashes(&self) -> Result<Vec<ContentHash>> {
        Ok(self.blocks.iter().map(|entry| *entry.key()).collect())
    }
}
