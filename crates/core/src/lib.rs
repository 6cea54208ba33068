//! surfsync-core: Core sync engine
//!
//! Provides chunking, the consistent hash ring, the block and metadata
//! stores, the local index, the sync cycle, and the wire codec.

pub mod block;
pub mod block_store;
pub mod cas;
pub mod chunker;
pub mod config;
pub mod error;
pub mod hash;
pub mod index;
pub mod meta_store;
pub mod metadata;
pub mod protocol;
pub mod ring;
pub mod scan;
pub mod service;
pub mod snapshot;
pub mod sync;

pub use block::{Block, BlockRef};
pub use block_store::MemoryBlockStore;
pub use cas::LmdbBlockStore;
pub use chunker::{ChunkConfig, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, chunk_data};
pub use config::{ClientConfig, ServerConfig, SurfsyncConfig};
pub use error::{Error, Result};
pub use hash::ContentHash;
pub use index::{INDEX_FILE, LocalIndex};
pub use meta_store::MetadataStore;
pub use metadata::{BlockStoreMap, FileInfoMap, FileMetadata, UpdateOutcome};
pub use protocol::{Frame, Request, Response};
pub use ring::ConsistentHashRing;
pub use scan::Scanner;
pub use service::{BlockStoreRouter, BlockStoreService, MetaStoreService};
pub use snapshot::{LocalFile, LocalSnapshot};
pub use sync::{SyncEngine, SyncOptions, SyncReport};
