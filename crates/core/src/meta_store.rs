//! Authoritative file metadata registry
//!
//! `update_file` is a check-and-set on the version. The read-check-write
//! happens inside the map entry guard, so two writers of the same
//! filename are serialized while other filenames stay independent.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::metadata::{BlockStoreMap, FileInfoMap, FileMetadata, UpdateOutcome};
use crate::ring::ConsistentHashRing;
use crate::service::MetaStoreService;

pub struct MetadataStore {
    files: DashMap<String, FileMetadata>,
    block_store_addrs: Vec<String>,
    ring: ConsistentHashRing,
}

impl MetadataStore {
    /// Create an empty registry over a fixed set of block store shards
    ///
    /// # Errors
    /// Returns `Error::Config` when `block_store_addrs` is empty, since
    /// no block could ever be placed.
    pub fn new(block_store_addrs: Vec<String>) -> Result<Self> {
        if block_store_addrs.is_empty() {
            return Err(Error::Config(
                "metadata store needs at least one block store shard".into(),
            ));
        }
        let ring = ConsistentHashRing::new(&block_store_addrs);
        Ok(Self {
            files: DashMap::new(),
            block_store_addrs,
            ring,
        })
    }

    #[must_use]
    pub fn ring(&self) -> &ConsistentHashRing {
        &self.ring
    }

    /// Current record for `filename`
    #[must_use]
    pub fn get(&self, filename: &str) -> Option<FileMetadata> {
        self.files.get(filename).map(|m| m.value().clone())
    }

    /// Apply the version rule synchronously
    pub fn apply_update(&self, proposed: FileMetadata) -> UpdateOutcome {
        match self.files.entry(proposed.filename.clone()) {
            Entry::Vacant(slot) => {
                if proposed.version != 1 {
                    debug!(
                        file = %proposed.filename,
                        version = proposed.version,
                        "rejected update: unknown file must start at version 1"
                    );
                    return UpdateOutcome::Conflict;
                }
                info!(file = %proposed.filename, version = 1, "created file");
                slot.insert(proposed);
                UpdateOutcome::Accepted(1)
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get().version;
                if proposed.version != current + 1 {
                    debug!(
                        file = %proposed.filename,
                        current,
                        proposed = proposed.version,
                        "rejected update: version is not current + 1"
                    );
                    return UpdateOutcome::Conflict;
                }
                let version = proposed.version;
                info!(
                    file = %proposed.filename,
                    version,
                    tombstone = proposed.is_tombstone(),
                    "updated file"
                );
                slot.insert(proposed);
                UpdateOutcome::Accepted(version)
            }
        }
    }

    /// Partition hashes by responsible shard, listing every shard
    #[must_use]
    pub fn partition(&self, hashes: &[ContentHash]) -> BlockStoreMap {
        let mut map: BlockStoreMap = self
            .block_store_addrs
            .iter()
            .map(|addr| (addr.clone(), Vec::new()))
            .collect();

        for hash in hashes {
            if let Some(addr) = self.ring.responsible_server(hash) {
                map.entry(addr.to_string()).or_default().push(*hash);
            }
        }
        map
    }
}

#[async_trait]
impl MetaStoreService for MetadataStore {
    async fn get_file_info_map(&self) -> Result<FileInfoMap> {
        Ok(self
            .files
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn update_file(&self, proposed: FileMetadata) -> Result<UpdateOutcome> {
        Ok(self.apply_update(proposed))
    }

    async fn get_block_store_map(&self, hashes: &[ContentHash]) -> Result<BlockStoreMap> {
        Ok(self.partition(hashes))
    }

    async fn get_block_store_addrs(&self) -> Result<Vec<String>> {
        Ok(self.block_store_addrs.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use super::*;
    use crate::block::BlockRef;

    fn meta(name: &str, version: u64, content: &[u8]) -> FileMetadata {
        FileMetadata::new(
            name,
            version,
            vec![BlockRef::Content(ContentHash::from_bytes(content))],
        )
    }

    fn shards() -> Vec<String> {
        vec![
            "localhost:8081".to_string(),
            "localhost:8082".to_string(),
            "localhost:8083".to_string(),
        ]
    }

    #[test]
    fn test_new_file_must_start_at_one() {
        let store = MetadataStore::new(shards()).unwrap();
        assert_eq!(store.apply_update(meta("a.txt", 2, b"x")), UpdateOutcome::Conflict);
        assert!(store.get("a.txt").is_none());

        assert_eq!(store.apply_update(meta("a.txt", 1, b"x")), UpdateOutcome::Accepted(1));
        assert_eq!(store.get("a.txt").unwrap().version, 1);
    }

    #[test]
    fn test_versions_are_gapless() {
        let store = MetadataStore::new(shards()).unwrap();
        store.apply_update(meta("f.txt", 1, b"v1"));

        // Replays, skips and stale versions are all rejected
        for bad in [0, 1, 3, 7] {
            assert_eq!(store.apply_update(meta("f.txt", bad, b"bad")), UpdateOutcome::Conflict);
        }
        assert_eq!(store.apply_update(meta("f.txt", 2, b"v2")), UpdateOutcome::Accepted(2));
        assert_eq!(store.apply_update(meta("f.txt", 2, b"v2b")), UpdateOutcome::Conflict);
        assert_eq!(store.apply_update(meta("f.txt", 3, b"v3")), UpdateOutcome::Accepted(3));

        let current = store.get("f.txt").unwrap();
        assert_eq!(current, meta("f.txt", 3, b"v3"));
    }

    #[test]
    fn test_tombstone_is_a_versioned_update() {
        let store = MetadataStore::new(shards()).unwrap();
        store.apply_update(meta("g.txt", 1, b"g"));
        assert_eq!(
            store.apply_update(FileMetadata::tombstone("g.txt", 2)),
            UpdateOutcome::Accepted(2)
        );
        assert!(store.get("g.txt").unwrap().is_tombstone());
    }

    #[test]
    fn test_empty_shard_list_rejected() {
        assert!(matches!(MetadataStore::new(Vec::new()), Err(Error::Config(_))));
    }

    #[test]
    fn test_concurrent_writers_accept_exactly_one_per_version() {
        let store = MetadataStore::new(shards()).unwrap();
        store.apply_update(meta("race.txt", 1, b"base"));

        let barrier = Barrier::new(16);
        let accepted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16u8)
                .map(|writer| {
                    let (store, barrier) = (&store, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        store.apply_update(meta("race.txt", 2, &[writer])).is_accepted()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(accepted, 1);
        assert_eq!(store.get("race.txt").unwrap().version, 2);
    }

    #[test]
    fn test_racing_writers_never_skip_or_repeat_a_version() {
        let store = MetadataStore::new(shards()).unwrap();
        store.apply_update(meta("hot.txt", 1, b"base"));

        // Every writer reads the current version and proposes the next one
        let barrier = Barrier::new(8);
        let accepted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8u8)
                .map(|writer| {
                    let (store, barrier) = (&store, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        let mut wins = 0usize;
                        for round in 0..200u8 {
                            let next = store.get("hot.txt").unwrap().version + 1;
                            if store
                                .apply_update(meta("hot.txt", next, &[writer, round]))
                                .is_accepted()
                            {
                                wins += 1;
                            }
                        }
                        wins
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        let version = store.get("hot.txt").unwrap().version;
        assert_eq!(accepted as u64, version - 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_different_files_update_in_parallel() {
        let store = Arc::new(MetadataStore::new(shards()).unwrap());

        let mut handles = Vec::new();
        for writer in 0..16u8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let name = format!("file-{writer}.txt");
                for version in 1..=50u64 {
                    let outcome = store
                        .update_file(meta(&name, version, &[writer]))
                        .await
                        .unwrap();
                    assert_eq!(outcome, UpdateOutcome::Accepted(version));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let map = store.get_file_info_map().await.unwrap();
        assert_eq!(map.len(), 16);
        assert!(map.values().all(|m| m.version == 50));
    }

    #[tokio::test]
    async fn test_block_store_map_lists_every_shard() {
        let store = MetadataStore::new(shards()).unwrap();
        let map = store.get_block_store_map(&[]).await.unwrap();
        assert_eq!(map.len(), 3);
        assert!(map.values().all(Vec::is_empty));

        let hashes: Vec<_> = (0..50u32)
            .map(|i| ContentHash::from_bytes(&i.to_be_bytes()))
            .collect();
        let map = store.get_block_store_map(&hashes).await.unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.values().map(Vec::len).sum::<usize>(), hashes.len());
        for (addr, assigned) in &map {
            for hash in assigned {
                assert_eq!(store.ring().responsible_server(hash), Some(addr.as_str()));
            }
        }
    }

    #[tokio::test]
    async fn test_file_info_map_snapshot() {
        let store = MetadataStore::new(shards()).unwrap();
        store.apply_update(meta("a.txt", 1, b"a"));
        store.apply_update(meta("b.txt", 1, b"b"));

        let map = store.get_file_info_map().await.unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a.txt", "b.txt"]);
        assert_eq!(store.get_block_store_addrs().await.unwrap(), shards());
    }
}
