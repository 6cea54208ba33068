//! Local in-process cluster for testing
//!
//! A `LocalCluster` holds one metadata store and a set of in-memory block
//! store shards, wired together without any network. Sync engines built
//! from it behave exactly like ones talking TCP, minus timeouts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use surfsync_core::{
    BlockStoreService, MemoryBlockStore, MetadataStore, Result, SyncEngine, SyncOptions,
};

/// Router type handed to engines built from a cluster
pub type LocalRouter = HashMap<String, Arc<dyn BlockStoreService>>;

/// Metadata store plus in-memory shards, keyed by shard address
pub struct LocalCluster {
    meta: Arc<MetadataStore>,
    shards: HashMap<String, Arc<MemoryBlockStore>>,
}

impl LocalCluster {
    /// Create a cluster with one empty shard per address
    ///
    /// # Errors
    /// Returns `Error::Config` for an empty address list
    pub fn new<S: AsRef<str>>(addrs: &[S]) -> Result<Self> {
        let addrs: Vec<String> = addrs.iter().map(|a| a.as_ref().to_string()).collect();
        let shards = addrs
            .iter()
            .map(|addr| (addr.clone(), Arc::new(MemoryBlockStore::new())))
            .collect();
        Ok(Self {
            meta: Arc::new(MetadataStore::new(addrs)?),
            shards,
        })
    }

    #[must_use]
    pub fn meta(&self) -> Arc<MetadataStore> {
        Arc::clone(&self.meta)
    }

    #[must_use]
    pub fn shard(&self, addr: &str) -> Option<Arc<MemoryBlockStore>> {
        self.shards.get(addr).cloned()
    }

    /// Total blocks held across every shard
    #[must_use]
    pub fn total_blocks(&self) -> usize {
        self.shards.values().map(|s| s.len()).sum()
    }

    /// Router over every shard
    #[must_use]
    pub fn router(&self) -> LocalRouter {
        self.shards
            .iter()
            .map(|(addr, shard)| {
                let store: Arc<dyn BlockStoreService> = shard.clone();
                (addr.clone(), store)
            })
            .collect()
    }

    /// Sync engine for `root` talking to this cluster
    #[must_use]
    pub fn engine(
        &self,
        root: impl Into<PathBuf>,
        options: SyncOptions,
    ) -> SyncEngine<Arc<MetadataStore>, LocalRouter> {
        SyncEngine::new(root, options, self.meta(), self.router())
    }
}
