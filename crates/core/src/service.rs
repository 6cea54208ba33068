//! Service traits the sync engine talks to
//!
//! Both in-process stores and remote TCP clients implement these, so the
//! engine does not care where a store lives.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::block::Block;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::metadata::{BlockStoreMap, FileInfoMap, FileMetadata, UpdateOutcome};

/// One block store shard
#[async_trait]
pub trait BlockStoreService: Send + Sync {
    /// Fetch a block, `Error::NotFound` if absent
    async fn get_block(&self, hash: &ContentHash) -> Result<Block>;

    /// Store a block under its recomputed hash, returning that hash
    async fn put_block(&self, block: Block) -> Result<ContentHash>;

    /// Subset of `hashes` not stored on this shard, input order kept
    async fn missing_blocks(&self, hashes: &[ContentHash]) -> Result<Vec<ContentHash>>;

    /// Every hash stored on this shard
    async fn get_all_block_hashes(&self) -> Result<Vec<ContentHash>>;
}

/// The authoritative file metadata coordinator
#[async_trait]
pub trait MetaStoreService: Send + Sync {
    async fn get_file_info_map(&self) -> Result<FileInfoMap>;

    /// Check-and-set on the file's version
    async fn update_file(&self, proposed: FileMetadata) -> Result<UpdateOutcome>;

    /// Partition `hashes` by responsible shard; every shard appears as a key
    async fn get_block_store_map(&self, hashes: &[ContentHash]) -> Result<BlockStoreMap>;

    async fn get_block_store_addrs(&self) -> Result<Vec<String>>;
}

/// Resolves a shard address to something that can serve it
pub trait BlockStoreRouter: Send + Sync {
    /// # Errors
    /// Returns an error if no store can be produced for `addr`
    fn block_store(&self, addr: &str) -> Result<Arc<dyn BlockStoreService>>;
}

impl BlockStoreRouter for HashMap<String, Arc<dyn BlockStoreService>> {
    fn block_store(&self, addr: &str) -> Result<Arc<dyn BlockStoreService>> {
        self.get(addr).cloned().ok_or_else(|| Error::Unreachable {
            addr: addr.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "unknown shard"),
        })
    }
}

#[async_trait]
impl<T: MetaStoreService + ?Sized> MetaStoreService for Arc<T> {
    async fn get_file_info_map(&self) -> Result<FileInfoMap> {
        (**self).get_file_info_map().await
    }

    async fn update_file(&self, proposed: FileMetadata) -> Result<UpdateOutcome> {
        (**self).update_file(proposed).await
    }

    async fn get_block_store_map(&self, hashes: &[ContentHash]) -> Result<BlockStoreMap> {
        (**self).get_block_store_map(hashes).await
    }

    async fn get_block_store_addrs(&self) -> Result<Vec<String>> {
        (**self).get_block_store_addrs().await
    }
}
