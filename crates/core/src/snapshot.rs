//! Snapshot: the chunked contents of the sync root at one point in time

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use serde::Serialize;

use crate::block::{Block, BlockRef};
use crate::chunker::{ChunkConfig, chunk_data};
use crate::hash::ContentHash;

/// One chunked local file
#[derive(Debug, Clone, Serialize)]
pub struct LocalFile {
    pub size: u64,
    /// Block list in byte-offset order
    pub blocks: Vec<BlockRef>,
    /// Payload for every distinct content hash of `blocks`
    #[serde(skip)]
    pub payloads: HashMap<ContentHash, Block>,
}

impl LocalFile {
    /// Chunk raw file content
    #[must_use]
    pub fn from_content(data: Bytes, config: &ChunkConfig) -> Self {
        let size = data.len() as u64;
        let chunked = chunk_data(&data, config);
        let payloads = chunked
            .blocks
            .into_iter()
            .map(|block| (block.hash(), block))
            .collect();
        Self {
            size,
            blocks: chunked.refs,
            payloads,
        }
    }

    /// Distinct content hashes in first-seen order
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<ContentHash> {
        let mut seen = std::collections::HashSet::new();
        self.blocks
            .iter()
            .filter_map(BlockRef::content_hash)
            .filter(|h| seen.insert(*h))
            .collect()
    }
}

/// Local directory contents keyed by filename. Recomputed every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LocalSnapshot {
    pub files: BTreeMap<String, LocalFile>,
}

impl LocalSnapshot {
    /// Create an empty snapshot
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get the number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn get(&self, filename: &str) -> Option<&LocalFile> {
        self.files.get(filename)
    }

    /// Total bytes across all files
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }
}
