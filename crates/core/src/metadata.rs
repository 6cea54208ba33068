//! File metadata records and the maps exchanged with the metadata store

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::block::BlockRef;
use crate::hash::ContentHash;

/// All file records known to a store, keyed by filename
pub type FileInfoMap = BTreeMap<String, FileMetadata>;

/// Shard address -> hashes that shard is responsible for
pub type BlockStoreMap = BTreeMap<String, Vec<ContentHash>>;

/// Versioned record of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    /// Starts at 1, grows by exactly one per accepted update
    pub version: u64,
    /// Block list in byte-offset order
    pub blocks: Vec<BlockRef>,
}

impl FileMetadata {
    #[must_use]
    pub fn new(filename: impl Into<String>, version: u64, blocks: Vec<BlockRef>) -> Self {
        Self {
            filename: filename.into(),
            version,
            blocks,
        }
    }

    /// Record marking `filename` as deleted at `version`
    #[must_use]
    pub fn tombstone(filename: impl Into<String>, version: u64) -> Self {
        Self::new(filename, version, vec![BlockRef::Tombstone])
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.blocks == [BlockRef::Tombstone]
    }

    #[must_use]
    pub fn is_empty_content(&self) -> bool {
        self.blocks == [BlockRef::EmptyContent]
    }

    /// Real content hashes in list order (markers skipped, duplicates kept)
    #[must_use]
    pub fn content_hashes(&self) -> Vec<ContentHash> {
        self.blocks.iter().filter_map(BlockRef::content_hash).collect()
    }
}

/// Answer of the metadata store to a proposed update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Update was applied; carries the new version
    Accepted(u64),
    /// Store has moved past the proposal's base version; drop the write
    Conflict,
}

impl UpdateOutcome {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}
