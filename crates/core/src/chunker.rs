//! Fixed-size chunking of file contents into content-addressed blocks

use bytes::Bytes;

use crate::block::{Block, BlockRef};
use crate::error::{Error, Result};
use crate::protocol::MAX_FRAME_LEN;

/// Default block size in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Largest block that still fits a single frame next to its size prefix
pub const MAX_BLOCK_SIZE: usize = MAX_FRAME_LEN as usize - 4;

/// Configuration for chunking; only built through `new` so the size is
/// always in range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    block_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl ChunkConfig {
    /// # Errors
    /// Returns `Error::Config` for a zero block size or one above
    /// `MAX_BLOCK_SIZE`
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::Config("block_size must be greater than zero".into()));
        }
        if block_size > MAX_BLOCK_SIZE {
            return Err(Error::Config(format!(
                "block_size {block_size} exceeds the maximum of {MAX_BLOCK_SIZE}"
            )));
        }
        Ok(Self { block_size })
    }

    /// Size of every block but the last, in bytes
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

/// Result of chunking one file: block list plus the matching payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunked {
    pub refs: Vec<BlockRef>,
    /// Payloads in the same order as the `Content` entries of `refs`
    pub blocks: Vec<Block>,
}

/// Split `data` into blocks of `config.block_size`; the last one may be shorter.
///
/// Empty input yields a single `EmptyContent` reference and no blocks.
/// Slicing `Bytes` keeps the payloads zero-copy.
#[must_use]
pub fn chunk_data(data: &Bytes, config: &ChunkConfig) -> Chunked {
    if data.is_empty() {
        return Chunked {
            refs: vec![BlockRef::EmptyContent],
            blocks: Vec::new(),
        };
    }

    let step = config.block_size;
    let mut refs = Vec::with_capacity(data.len().div_ceil(step));
    let mut blocks = Vec::with_capacity(refs.capacity());

    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + step).min(data.len());
        let block = Block::new(data.slice(offset..end));
        refs.push(BlockRef::Content(block.hash()));
        blocks.push(block);
        offset = end;
    }

    Chunked { refs, blocks }
}
