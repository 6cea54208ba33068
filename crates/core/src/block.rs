//! Blocks and the references a file's block list is made of

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// An immutable chunk of file bytes
///
/// Identity is the hash of `data`; stores always recompute it.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    pub data: Bytes,
}

impl Block {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Payload length in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Recompute the content hash of the payload
    #[must_use]
    pub fn hash(&self) -> ContentHash {
        ContentHash::from_bytes(&self.data)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("hash", &self.hash())
            .field("size", &self.size())
            .finish()
    }
}

/// One entry of a file's ordered block list
///
/// `Tombstone` and `EmptyContent` only ever appear as the sole entry of a
/// list. Being separate variants, they cannot collide with a real hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "hash", rename_all = "snake_case")]
pub enum BlockRef {
    /// File was deleted
    Tombstone,
    /// File exists with zero bytes
    EmptyContent,
    /// Block of real content
    Content(ContentHash),
}

impl BlockRef {
    /// The content hash, if this refers to stored bytes
    #[must_use]
    pub fn content_hash(&self) -> Option<ContentHash> {
        match self {
            Self::Content(hash) => Some(*hash),
            Self::Tombstone | Self::EmptyContent => None,
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tombstone => write!(f, "<tombstone>"),
            Self::EmptyContent => write!(f, "<empty>"),
            Self::Content(hash) => write!(f, "{hash}"),
        }
    }
}
