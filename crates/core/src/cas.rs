//! Durable block store shard backed by LMDB
//!
//! Key: ContentHash (32 bytes)
//! Value: raw block bytes

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use heed::types::Bytes as HeedBytes;
use heed::{Database, Env, EnvOpenOptions};
use tracing::trace;

use crate::block::Block;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::service::BlockStoreService;

pub struct LmdbBlockStore {
    env: Env,
    /// blocks database: hash -> data
    blocks: Database<HeedBytes, HeedBytes>,
}

impl LmdbBlockStore {
    /// Open or create a block store at the given directory.
    ///
    /// # Errors
    /// Returns an error if the environment cannot be opened or created.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        // SAFETY: the environment is opened once per directory by this process
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(4 * 1024 * 1024 * 1024)
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let blocks: Database<HeedBytes, HeedBytes> = env
            .database_options()
            .types::<HeedBytes, HeedBytes>()
            .name("blocks")
            .create(&mut wtxn)?;
        wtxn.commit()?;

        Ok(Self { env, blocks })
    }

    /// Number of stored blocks
    ///
    /// # Errors
    /// Returns an error if the read transaction fails.
    pub fn len(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.blocks.len(&rtxn)?)
    }
}

#[async_trait]
impl BlockStoreService for LmdbBlockStore {
    async fn get_block(&self, hash: &ContentHash) -> Result<Block> {
        let rtxn = self.env.read_txn()?;
        let data = self
            .blocks
            .get(&rtxn, hash.as_bytes())?
            .ok_or(Error::NotFound(*hash))?;
        Ok(Block::new(Bytes::copy_from_slice(data)))
    }

    async fn put_block(&self, block: Block) -> Result<ContentHash> {
        let hash = block.hash();
        let mut wtxn = self.env.write_txn()?;

        if self.blocks.get(&wtxn, hash.as_bytes())?.is_none() {
            self.blocks.put(&mut wtxn, hash.as_bytes(), &block.data)?;
            wtxn.commit()?;
            trace!(%hash, "stored block");
        }

        Ok(hash)
    }

    async fn missing_blocks(&self, hashes: &[ContentHash]) -> Result<Vec<ContentHash>> {
        let rtxn = self.env.read_txn()?;
        let mut missing = Vec::new();
        for hash in hashes {
            if self.blocks.get(&rtxn, hash.as_bytes())?.is_none() {
                missing.push(*hash);
            }
        }
        Ok(missing)
    }

    async fn get_all_block_hashes(&self) -> Result<Vec<ContentHash>> {
        let rtxn = self.env.read_txn()?;
        let mut hashes = Vec::new();
        for entry in self.blocks.iter(&rtxn)? {
            let (key, _) = entry?;
            let raw: [u8; 32] = key
                .try_into()
                .map_err(|_| Error::Integrity(format!("stored key of {} bytes", key.len())))?;
            hashes.push(ContentHash::from_raw(raw));
        }
        Ok(hashes)
    }
}
