//! One sync cycle: push local changes, then pull remote state, then commit
//!
//! ```text
//!   scan disk ──► LocalSnapshot ─┐
//!   load index ─► LocalIndex ────┼─► push changes ─► push deletions
//!                                │
//!   GetFileInfoMap ─► remote ────┴─► pull ─► save remote as LocalIndex
//! ```
//!
//! Any error aborts the cycle before the index is written, so a failed
//! cycle can simply be run again. A rejected update means the remote moved
//! on; the local change is dropped and the pull phase restores the remote
//! version.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::chunker::ChunkConfig;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::index::{INDEX_FILE, LocalIndex};
use crate::metadata::{BlockStoreMap, FileInfoMap, FileMetadata, UpdateOutcome};
use crate::scan::Scanner;
use crate::service::{BlockStoreRouter, MetaStoreService};
use crate::snapshot::{LocalFile, LocalSnapshot};

/// Knobs for a sync cycle
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub chunk: ChunkConfig,
    /// Filter uploads through `missing_blocks` first
    pub skip_present_blocks: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            skip_present_blocks: true,
        }
    }
}

impl TryFrom<&ClientConfig> for SyncOptions {
    type Error = Error;

    fn try_from(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            chunk: config.chunk_config()?,
            skip_present_blocks: config.skip_present_blocks,
        })
    }
}

/// What a cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files whose new content was accepted remotely
    pub pushed: Vec<String>,
    /// Files whose deletion was accepted remotely
    pub tombstoned: Vec<String>,
    /// Local changes rejected because the remote moved on
    pub conflicts: Vec<String>,
    /// Files written locally from remote content
    pub pulled: Vec<String>,
    /// Files removed locally because the remote deleted them
    pub removed: Vec<String>,
    /// `update_file` plus `put_block` calls
    pub network_writes: usize,
    pub blocks_uploaded: usize,
    pub bytes_uploaded: u64,
    pub blocks_downloaded: usize,
}

impl SyncReport {
    /// True when the cycle changed nothing on either side
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.network_writes == 0 && self.pulled.is_empty() && self.removed.is_empty()
    }
}

/// Client-side reconciler for one sync root
pub struct SyncEngine<M, R> {
    root: PathBuf,
    options: SyncOptions,
    meta: M,
    router: R,
}

impl<M: MetaStoreService, R: BlockStoreRouter> SyncEngine<M, R> {
    pub fn new(root: impl Into<PathBuf>, options: SyncOptions, meta: M, router: R) -> Self {
        Self {
            root: root.into(),
            options,
            meta,
            router,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run one full cycle
    ///
    /// # Errors
    /// Any store, network or filesystem failure; the local index is left
    /// untouched in that case.
    pub async fn run_cycle(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        info!("Scanning {}...", self.root.display());
        let local = Scanner::new(&self.root, self.options.chunk).scan()?;
        let index = LocalIndex::load(&self.root)?;
        debug!(local = local.len(), indexed = index.len(), "loaded local state");

        self.push_changes(&local, &index, &mut report).await?;
        self.push_deletions(&local, &index, &mut report).await?;

        let remote = self.meta.get_file_info_map().await?;
        debug!(remote = remote.len(), "fetched remote index");

        self.pull(&local, &remote, &mut report).await?;

        LocalIndex::from_files(remote).save(&self.root)?;
        info!(
            pushed = report.pushed.len(),
            deleted = report.tombstoned.len(),
            conflicts = report.conflicts.len(),
            pulled = report.pulled.len(),
            removed = report.removed.len(),
            "Cycle complete"
        );
        Ok(report)
    }

    /// Propose new and modified files
    async fn push_changes(
        &self,
        local: &LocalSnapshot,
        index: &LocalIndex,
        report: &mut SyncReport,
    ) -> Result<()> {
        for (filename, file) in &local.files {
            let version = match index.get(filename) {
                None => 1,
                Some(prev) if prev.blocks != file.blocks => prev.version + 1,
                Some(_) => continue,
            };

            let proposal = FileMetadata::new(filename.clone(), version, file.blocks.clone());
            let hashes = file.unique_hashes();
            let placement = if hashes.is_empty() {
                BlockStoreMap::new()
            } else {
                self.meta.get_block_store_map(&hashes).await?
            };

            report.network_writes += 1;
            match self.meta.update_file(proposal).await? {
                UpdateOutcome::Accepted(version) => {
                    debug!(file = %filename, version, "update accepted");
                    self.upload_blocks(file, &placement, report).await?;
                    report.pushed.push(filename.clone());
                }
                UpdateOutcome::Conflict => {
                    warn!(file = %filename, version, "update rejected, remote version wins");
                    report.conflicts.push(filename.clone());
                }
            }
        }
        Ok(())
    }

    /// Propose tombstones for indexed files that disappeared from disk
    async fn push_deletions(
        &self,
        local: &LocalSnapshot,
        index: &LocalIndex,
        report: &mut SyncReport,
    ) -> Result<()> {
        for (filename, prev) in &index.files {
            if local.files.contains_key(filename) || prev.is_tombstone() {
                continue;
            }

            let version = prev.version + 1;
            report.network_writes += 1;
            match self
                .meta
                .update_file(FileMetadata::tombstone(filename.clone(), version))
                .await?
            {
                UpdateOutcome::Accepted(_) => {
                    debug!(file = %filename, version, "deletion accepted");
                    report.tombstoned.push(filename.clone());
                }
                UpdateOutcome::Conflict => {
                    warn!(file = %filename, version, "deletion rejected, remote version wins");
                    report.conflicts.push(filename.clone());
                }
            }
        }
        Ok(())
    }

    async fn upload_blocks(
        &self,
        file: &LocalFile,
        placement: &BlockStoreMap,
        report: &mut SyncReport,
    ) -> Result<()> {
        for (addr, hashes) in placement {
            if hashes.is_empty() {
                continue;
            }

            let store = self.router.block_store(addr)?;
            let to_send = if self.options.skip_present_blocks {
                store.missing_blocks(hashes).await?
            } else {
                hashes.clone()
            };
            debug!(shard = %addr, assigned = hashes.len(), sending = to_send.len(), "uploading");

            for hash in to_send {
                let block = file.payloads.get(&hash).cloned().ok_or_else(|| {
                    Error::Integrity(format!("no local payload for block {hash}"))
                })?;
                report.bytes_uploaded += block.size() as u64;
                store.put_block(block).await?;
                report.network_writes += 1;
                report.blocks_uploaded += 1;
            }
        }
        Ok(())
    }

    /// Make the local directory match every remote record that differs
    async fn pull(
        &self,
        local: &LocalSnapshot,
        remote: &FileInfoMap,
        report: &mut SyncReport,
    ) -> Result<()> {
        for (filename, meta) in remote {
            let local_file = local.get(filename);
            if local_file.is_some_and(|f| f.blocks == meta.blocks) {
                continue;
            }
            if meta.is_tombstone() && local_file.is_none() {
                continue;
            }

            let path = self.local_path(filename)?;
            refuse_non_regular(&path)?;
            if meta.is_tombstone() {
                info!("Removing {filename}");
                std::fs::remove_file(&path)?;
                report.removed.push(filename.clone());
            } else if meta.is_empty_content() {
                info!("Pulling {filename} (empty)");
                std::fs::write(&path, b"")?;
                report.pulled.push(filename.clone());
            } else {
                info!("Pulling {filename} v{}", meta.version);
                let data = self.fetch_content(meta, report).await?;
                std::fs::write(&path, &data)?;
                report.pulled.push(filename.clone());
            }
        }
        Ok(())
    }

    /// Fetch every block of `meta` and concatenate them in list order
    async fn fetch_content(&self, meta: &FileMetadata, report: &mut SyncReport) -> Result<Vec<u8>> {
        let hashes = meta.content_hashes();
        let mut seen = HashSet::new();
        let unique: Vec<ContentHash> = hashes.iter().copied().filter(|h| seen.insert(*h)).collect();

        let placement = self.meta.get_block_store_map(&unique).await?;
        let owners: HashMap<ContentHash, &str> = placement
            .iter()
            .flat_map(|(addr, hs)| hs.iter().map(move |h| (*h, addr.as_str())))
            .collect();

        let mut fetched = HashMap::with_capacity(unique.len());
        for hash in unique {
            let addr = owners
                .get(&hash)
                .ok_or_else(|| Error::Protocol(format!("no shard assigned to block {hash}")))?;
            let block = self.router.block_store(addr)?.get_block(&hash).await?;
            if block.hash() != hash {
                return Err(Error::Integrity(format!(
                    "{addr} returned block {} for {hash}",
                    block.hash()
                )));
            }
            report.blocks_downloaded += 1;
            fetched.insert(hash, block.data);
        }

        let mut buf = BytesMut::new();
        for hash in &hashes {
            buf.extend_from_slice(&fetched[hash]);
        }
        Ok(buf.to_vec())
    }

    /// Path of a remote filename inside the flat root
    fn local_path(&self, filename: &str) -> Result<PathBuf> {
        let flat = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && filename != INDEX_FILE
            && !filename.contains(['/', '\\']);
        if !flat {
            return Err(Error::Integrity(format!(
                "remote filename {filename:?} is not a plain file name"
            )));
        }
        Ok(self.root.join(filename))
    }
}

/// A pull may only replace a regular file or create a missing one.
///
/// The scanner skips symlinks and other special entries, so a remote file
/// can share a name with one. Writing through it would land outside the root.
fn refuse_non_regular(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_file() => Ok(()),
        Ok(_) => Err(Error::MalformedLocalState(format!(
            "{} is not a regular file; refusing to overwrite it",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Arc;

    use super::*;
    use crate::block::BlockRef;
    use crate::block_store::MemoryBlockStore;
    use crate::meta_store::MetadataStore;
    use crate::service::BlockStoreService;

    const SHARDS: [&str; 2] = ["shard-a:1", "shard-b:1"];

    struct Cluster {
        meta: Arc<MetadataStore>,
        router: HashMap<String, Arc<dyn BlockStoreService>>,
    }

    fn cluster() -> Cluster {
        let router = SHARDS
            .iter()
            .map(|addr| {
                let store: Arc<dyn BlockStoreService> = Arc::new(MemoryBlockStore::new());
                (addr.to_string(), store)
            })
            .collect();
        Cluster {
            meta: Arc::new(
                MetadataStore::new(SHARDS.iter().map(ToString::to_string).collect()).unwrap(),
            ),
            router,
        }
    }

    fn engine(
        cluster: &Cluster,
        root: &Path,
    ) -> SyncEngine<Arc<MetadataStore>, HashMap<String, Arc<dyn BlockStoreService>>> {
        let options = SyncOptions {
            chunk: ChunkConfig::new(8).unwrap(),
            skip_present_blocks: true,
        };
        SyncEngine::new(root, options, Arc::clone(&cluster.meta), cluster.router.clone())
    }

    #[tokio::test]
    async fn test_first_cycle_pushes_and_commits() {
        let cluster = cluster();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello blocks, more than eight bytes").unwrap();
        fs::write(dir.path().join("empty.txt"), "").unwrap();

        let report = engine(&cluster, dir.path()).run_cycle().await.unwrap();
        assert_eq!(report.pushed, vec!["a.txt", "empty.txt"]);
        assert!(report.conflicts.is_empty());
        assert!(report.pulled.is_empty());

        let remote = cluster.meta.get("a.txt").unwrap();
        assert_eq!(remote.version, 1);
        assert!(cluster.meta.get("empty.txt").unwrap().is_empty_content());

        let index = LocalIndex::load(dir.path()).unwrap();
        assert_eq!(index.get("a.txt"), Some(&remote));
    }

    #[tokio::test]
    async fn test_second_cycle_is_noop() {
        let cluster = cluster();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "some content to split up").unwrap();

        let sync = engine(&cluster, dir.path());
        sync.run_cycle().await.unwrap();
        let second = sync.run_cycle().await.unwrap();

        assert!(second.is_noop(), "{second:?}");
        assert_eq!(cluster.meta.get("a.txt").unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_modification_bumps_version() {
        let cluster = cluster();
        let dir = tempfile::tempdir().unwrap();
        let sync = engine(&cluster, dir.path());

        fs::write(dir.path().join("f.txt"), "version one").unwrap();
        sync.run_cycle().await.unwrap();
        fs::write(dir.path().join("f.txt"), "version two is longer").unwrap();
        let report = sync.run_cycle().await.unwrap();

        assert_eq!(report.pushed, vec!["f.txt"]);
        assert_eq!(cluster.meta.get("f.txt").unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_nested_directory_aborts_without_writing_index() {
        let cluster = cluster();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let result = engine(&cluster, dir.path()).run_cycle().await;
        assert!(matches!(result, Err(Error::MalformedLocalState(_))));
        assert!(!dir.path().join(INDEX_FILE).exists());
        assert!(cluster.meta.get("a.txt").is_none());
    }

    #[tokio::test]
    async fn test_unsafe_remote_filename_is_refused() {
        let cluster = cluster();
        cluster
            .meta
            .apply_update(FileMetadata::new("../escape", 1, vec![BlockRef::EmptyContent]));
        let dir = tempfile::tempdir().unwrap();

        let result = engine(&cluster, dir.path()).run_cycle().await;
        assert!(matches!(result, Err(Error::Integrity(_))));
        assert!(!dir.path().join(INDEX_FILE).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pull_never_writes_through_a_symlink() {
        let cluster = cluster();
        let writer = tempfile::tempdir().unwrap();
        fs::write(writer.path().join("x.txt"), "remote content").unwrap();
        fs::write(writer.path().join("blank.txt"), "").unwrap();
        engine(&cluster, writer.path()).run_cycle().await.unwrap();

        let outside = tempfile::tempdir().unwrap();
        let victim = outside.path().join("victim.txt");
        fs::write(&victim, "original outside content").unwrap();

        for name in ["x.txt", "blank.txt"] {
            let reader = tempfile::tempdir().unwrap();
            std::os::unix::fs::symlink(&victim, reader.path().join(name)).unwrap();

            let result = engine(&cluster, reader.path()).run_cycle().await;
            assert!(
                matches!(result, Err(Error::MalformedLocalState(_))),
                "{name}: {result:?}"
            );
            assert!(!reader.path().join(INDEX_FILE).exists());
        }
        assert_eq!(fs::read_to_string(&victim).unwrap(), "original outside content");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tombstone_leaves_symlink_alone() {
        let cluster = cluster();
        cluster
            .meta
            .apply_update(FileMetadata::new("gone.txt", 1, vec![BlockRef::EmptyContent]));
        cluster.meta.apply_update(FileMetadata::tombstone("gone.txt", 2));

        let outside = tempfile::tempdir().unwrap();
        let victim = outside.path().join("victim.txt");
        fs::write(&victim, "kept").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("gone.txt");
        std::os::unix::fs::symlink(&victim, &link).unwrap();

        let report = engine(&cluster, dir.path()).run_cycle().await.unwrap();
        assert!(report.removed.is_empty());
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&victim).unwrap(), "kept");
    }
}
