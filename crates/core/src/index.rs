//! Local index: the remote metadata accepted at the end of the last cycle
//!
//! It is the base of the three-way comparison (disk vs last sync vs
//! remote). Persisted as a single rkyv archive in the sync root.

use std::collections::BTreeMap;
use std::path::Path;

use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::block::BlockRef;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::metadata::{FileInfoMap, FileMetadata};

/// Reserved file name of the index inside the sync root; never synced
pub const INDEX_FILE: &str = "index.rkyv";

/// Archived form of a `BlockRef`
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[rkyv(derive(Debug))]
enum IndexedBlock {
    Tombstone,
    EmptyContent,
    Content([u8; 32]),
}

impl From<&BlockRef> for IndexedBlock {
    fn from(block: &BlockRef) -> Self {
        match block {
            BlockRef::Tombstone => Self::Tombstone,
            BlockRef::EmptyContent => Self::EmptyContent,
            BlockRef::Content(hash) => Self::Content(*hash.as_bytes()),
        }
    }
}

impl From<IndexedBlock> for BlockRef {
    fn from(block: IndexedBlock) -> Self {
        match block {
            IndexedBlock::Tombstone => Self::Tombstone,
            IndexedBlock::EmptyContent => Self::EmptyContent,
            IndexedBlock::Content(raw) => Self::Content(ContentHash::from_raw(raw)),
        }
    }
}

/// State of one file at last successful sync
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
struct IndexedFile {
    version: u64,
    blocks: Vec<IndexedBlock>,
}

#[derive(Archive, Serialize, Deserialize, Debug, Default)]
#[rkyv(derive(Debug))]
struct IndexArchive {
    files: BTreeMap<String, IndexedFile>,
}

/// Last-synced metadata for every file, keyed by filename
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalIndex {
    pub files: FileInfoMap,
}

impl LocalIndex {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_files(files: FileInfoMap) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn get(&self, filename: &str) -> Option<&FileMetadata> {
        self.files.get(filename)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Load the index from the sync root, or an empty one if none exists
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(INDEX_FILE);
        if !path.exists() {
            return Ok(Self::new());
        }

        let bytes = std::fs::read(&path)?;
        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(&bytes);
        let archive = rkyv::from_bytes::<IndexArchive, RkyvError>(&aligned)
            .map_err(|e| Error::Index(format!("failed to decode {}: {e}", path.display())))?;

        let files = archive
            .files
            .into_iter()
            .map(|(filename, file)| {
                let blocks = file.blocks.into_iter().map(BlockRef::from).collect();
                let meta = FileMetadata::new(filename.clone(), file.version, blocks);
                (filename, meta)
            })
            .collect();

        Ok(Self { files })
    }

    /// Replace the index file in the sync root with this index
    ///
    /// # Errors
    /// Returns an error if encoding or writing fails.
    pub fn save(&self, root: &Path) -> Result<()> {
        let archive = IndexArchive {
            files: self
                .files
                .iter()
                .map(|(filename, meta)| {
                    let file = IndexedFile {
                        version: meta.version,
                        blocks: meta.blocks.iter().map(IndexedBlock::from).collect(),
                    };
                    (filename.clone(), file)
                })
                .collect(),
        };

        let bytes = rkyv::to_bytes::<RkyvError>(&archive)
            .map_err(|e| Error::Index(format!("failed to encode index: {e}")))?;
        std::fs::write(root.join(INDEX_FILE), &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LocalIndex {
        let a = ContentHash::from_bytes(b"a");
        let b = ContentHash::from_bytes(b"b");
        let mut files = FileInfoMap::new();
        files.insert(
            "f.txt".into(),
            FileMetadata::new(
                "f.txt",
                3,
                vec![BlockRef::Content(b), BlockRef::Content(a), BlockRef::Content(b)],
            ),
        );
        files.insert("g.txt".into(), FileMetadata::tombstone("g.txt", 5));
        files.insert(
            "empty.txt".into(),
            FileMetadata::new("empty.txt", 1, vec![BlockRef::EmptyContent]),
        );
        LocalIndex::from_files(files)
    }

    #[test]
    fn test_index_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let index = sample();

        index.save(dir.path()).unwrap();
        let loaded = LocalIndex::load(dir.path()).unwrap();

        assert_eq!(loaded, index);
        assert_eq!(
            loaded.get("f.txt").unwrap().blocks,
            index.get("f.txt").unwrap().blocks
        );
    }

    #[test]
    fn test_missing_index_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalIndex::load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_save_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        sample().save(dir.path()).unwrap();

        let mut smaller = FileInfoMap::new();
        smaller.insert("only.txt".into(), FileMetadata::tombstone("only.txt", 2));
        LocalIndex::from_files(smaller.clone()).save(dir.path()).unwrap();

        assert_eq!(LocalIndex::load(dir.path()).unwrap().files, smaller);
    }

    #[test]
    fn test_corrupt_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), b"bad").unwrap();
        assert!(matches!(LocalIndex::load(dir.path()), Err(Error::Index(_))));
    }
}
