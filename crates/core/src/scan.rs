//! Flat directory scanning via the `ignore` crate
//!
//! The sync root holds regular files only. A nested directory is a fatal
//! error for the cycle, and the index file is never scanned.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::chunker::ChunkConfig;
use crate::error::{Error, Result};
use crate::index::INDEX_FILE;
use crate::snapshot::{LocalFile, LocalSnapshot};

/// Scanner for a flat sync root
pub struct Scanner {
    root: PathBuf,
    config: ChunkConfig,
}

impl Scanner {
    /// Create a new scanner for the given root directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, config: ChunkConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a configured walk builder
    fn walk_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .standard_filters(false) // Every file is synced, hidden and gitignored ones too
            .follow_links(false)
            .max_depth(Some(1));
        builder
    }

    /// Scan and chunk every file in the root
    ///
    /// # Errors
    /// `MalformedLocalState` for nested directories, non-UTF-8 names or
    /// unreadable files; `Io` if the root itself cannot be walked.
    pub fn scan(&self) -> Result<LocalSnapshot> {
        let mut snapshot = LocalSnapshot::empty();

        for result in self.walk_builder().build() {
            let entry = result.map_err(|e| match e.into_io_error() {
                Some(io) => Error::Io(io),
                None => Error::MalformedLocalState(format!(
                    "failed to walk {}",
                    self.root.display()
                )),
            })?;

            if entry.depth() == 0 {
                continue;
            }

            let path = entry.path();
            let Some(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                return Err(Error::MalformedLocalState(format!(
                    "nested directory {} in sync root",
                    path.display()
                )));
            }

            if !file_type.is_file() {
                warn!("Skipping non-regular entry {}", path.display());
                continue;
            }

            let filename = entry
                .file_name()
                .to_str()
                .ok_or_else(|| {
                    Error::MalformedLocalState(format!("non UTF-8 file name {}", path.display()))
                })?
                .to_string();

            if filename == INDEX_FILE {
                continue;
            }

            let file = self.chunk_file(path)?;
            debug!(file = %filename, size = file.size, blocks = file.blocks.len(), "chunked");
            snapshot.files.insert(filename, file);
        }

        Ok(snapshot)
    }

    fn chunk_file(&self, path: &Path) -> Result<LocalFile> {
        let data = std::fs::read(path).map_err(|e| {
            Error::MalformedLocalState(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(LocalFile::from_content(Bytes::from(data), &self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockRef;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_simple_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file1.txt"), "hello").unwrap();
        fs::write(dir.path().join("file2.txt"), "world").unwrap();
        fs::write(dir.path().join(".hidden"), "kept").unwrap();

        let snapshot = Scanner::new(dir.path(), ChunkConfig::default()).scan().unwrap();

        assert_eq!(
            snapshot.files.keys().collect::<Vec<_>>(),
            vec![".hidden", "file1.txt", "file2.txt"]
        );
    }

    #[test]
    fn test_scan_skips_index_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(INDEX_FILE), "index bytes").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let snapshot = Scanner::new(dir.path(), ChunkConfig::default()).scan().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get(INDEX_FILE).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_skips_symlinks() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("target.txt"), "outside").unwrap();
        std::os::unix::fs::symlink(outside.path().join("target.txt"), dir.path().join("link.txt"))
            .unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let snapshot = Scanner::new(dir.path(), ChunkConfig::default()).scan().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("link.txt").is_none());
    }

    #[test]
    fn test_scan_nested_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("root.txt"), "root").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let result = Scanner::new(dir.path(), ChunkConfig::default()).scan();
        assert!(matches!(result, Err(Error::MalformedLocalState(_))));
    }

    #[test]
    fn test_scan_chunks_with_configured_size() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("big.bin"), vec![1u8; 10]).unwrap();
        fs::write(dir.path().join("empty.txt"), "").unwrap();

        let snapshot = Scanner::new(dir.path(), ChunkConfig::new(4).unwrap())
            .scan()
            .unwrap();

        assert_eq!(snapshot.get("big.bin").unwrap().blocks.len(), 3);
        assert_eq!(
            snapshot.get("empty.txt").unwrap().blocks,
            vec![BlockRef::EmptyContent]
        );
        assert_eq!(snapshot.total_size(), 10);
    }
}
