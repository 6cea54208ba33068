//! Consistent hash ring mapping block hashes to block store shards
//!
//! Shards sit at `BLAKE3("blockstore" + addr)`; blocks sit at their own
//! content hash. A block belongs to the first shard whose position is
//! strictly greater than the block's, wrapping to the smallest position.
//! The ring is fixed at construction.

use crate::hash::ContentHash;

#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    /// (position, shard address), sorted by position
    positions: Vec<(ContentHash, String)>,
}

/// Namespace prefixed to shard addresses before hashing
const SHARD_NAMESPACE: &str = "blockstore";

impl ConsistentHashRing {
    /// Build the ring from the static shard address list.
    #[must_use]
    pub fn new<S: AsRef<str>>(addrs: &[S]) -> Self {
        let mut positions: Vec<_> = addrs
            .iter()
            .map(|addr| {
                let addr = addr.as_ref();
                (Self::shard_position(addr), addr.to_string())
            })
            .collect();
        positions.sort();
        positions.dedup_by(|a, b| a.0 == b.0);
        Self { positions }
    }

    /// Ring position of a shard address
    #[must_use]
    pub fn shard_position(addr: &str) -> ContentHash {
        ContentHash::from_bytes(format!("{SHARD_NAMESPACE}{addr}").as_bytes())
    }

    /// Shard responsible for `key`, or `None` on an empty ring
    #[must_use]
    pub fn responsible_server(&self, key: &ContentHash) -> Option<&str> {
        let idx = self.positions.partition_point(|(pos, _)| pos <= key);
        self.positions
            .get(idx)
            .or_else(|| self.positions.first())
            .map(|(_, addr)| addr.as_str())
    }

    /// Number of shards on the ring
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
