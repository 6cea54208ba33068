//! TCP clients for remote block and metadata stores
//!
//! Every call opens a fresh connection, sends one request frame and reads
//! one response frame, all under a single deadline. Nothing is retried; a
//! failed call fails the sync cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use surfsync_core::protocol::{Request, Response};
use surfsync_core::{
    Block, BlockStoreMap, BlockStoreRouter, BlockStoreService, ContentHash, Error, FileInfoMap,
    FileMetadata, MetaStoreService, Result, UpdateOutcome,
};
use tokio::net::TcpStream;
use tracing::trace;

use crate::frame::{read_frame, write_frame};

/// Default per-call deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Send one request to `addr` and wait for its response
async fn call(addr: &str, timeout: Duration, request: Request) -> Result<Response> {
    let unreachable = |source: std::io::Error| Error::Unreachable {
        addr: addr.to_string(),
        source,
    };
    // Socket failures after connect are the remote going away, not local IO
    let lost = |e: Error| match e {
        Error::Io(source) => unreachable(source),
        other => other,
    };

    let exchange = async {
        let mut stream = TcpStream::connect(addr).await.map_err(unreachable)?;
        stream.set_nodelay(true).map_err(unreachable)?;

        write_frame(&mut stream, &request.encode()).await.map_err(lost)?;
        let frame = read_frame(&mut stream)
            .await
            .map_err(lost)?
            .ok_or_else(|| {
                unreachable(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before response",
                ))
            })?;
        Response::decode(frame)
    };

    let response = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| Error::Timeout {
            addr: addr.to_string(),
            after: timeout,
        })??;

    trace!(%addr, ?response, "response");
    match response {
        Response::Error(message) => Err(Error::Remote {
            addr: addr.to_string(),
            message,
        }),
        other => Ok(other),
    }
}

fn unexpected(addr: &str, response: &Response) -> Error {
    Error::Protocol(format!("unexpected response from {addr}: {response:?}"))
}

/// Client for one block store shard
#[derive(Debug, Clone)]
pub struct RemoteBlockStore {
    addr: String,
    timeout: Duration,
}

impl RemoteBlockStore {
    #[must_use]
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl BlockStoreService for RemoteBlockStore {
    async fn get_block(&self, hash: &ContentHash) -> Result<Block> {
        match call(&self.addr, self.timeout, Request::GetBlock(*hash)).await? {
            Response::Block(block) => Ok(block),
            Response::NotFound(hash) => Err(Error::NotFound(hash)),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    async fn put_block(&self, block: Block) -> Result<ContentHash> {
        match call(&self.addr, self.timeout, Request::PutBlock(block)).await? {
            Response::Stored(hash) => Ok(hash),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    async fn missing_blocks(&self, hashes: &[ContentHash]) -> Result<Vec<ContentHash>> {
        let request = Request::MissingBlocks(hashes.to_vec());
        match call(&self.addr, self.timeout, request).await? {
            Response::Hashes(missing) => Ok(missing),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    async fn get_all_block_hashes(&self) -> Result<Vec<ContentHash>> {
        match call(&self.addr, self.timeout, Request::GetAllBlockHashes).await? {
            Response::Hashes(hashes) => Ok(hashes),
            other => Err(unexpected(&self.addr, &other)),
        }
    }
}

/// Client for the metadata store
#[derive(Debug, Clone)]
pub struct RemoteMetaStore {
    addr: String,
    timeout: Duration,
}

impl RemoteMetaStore {
    #[must_use]
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl MetaStoreService for RemoteMetaStore {
    async fn get_file_info_map(&self) -> Result<FileInfoMap> {
        match call(&self.addr, self.timeout, Request::GetFileInfoMap).await? {
            Response::FileInfoMap(map) => Ok(map),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    async fn update_file(&self, proposed: FileMetadata) -> Result<UpdateOutcome> {
        match call(&self.addr, self.timeout, Request::UpdateFile(proposed)).await? {
            Response::Update(outcome) => Ok(outcome),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    async fn get_block_store_map(&self, hashes: &[ContentHash]) -> Result<BlockStoreMap> {
        let request = Request::GetBlockStoreMap(hashes.to_vec());
        match call(&self.addr, self.timeout, request).await? {
            Response::BlockStoreMap(map) => Ok(map),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    async fn get_block_store_addrs(&self) -> Result<Vec<String>> {
        match call(&self.addr, self.timeout, Request::GetBlockStoreAddrs).await? {
            Response::Addrs(addrs) => Ok(addrs),
            other => Err(unexpected(&self.addr, &other)),
        }
    }
}

/// Routes shard addresses to TCP clients
#[derive(Debug, Clone, Copy)]
pub struct TcpRouter {
    timeout: Duration,
}

impl TcpRouter {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpRouter {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl BlockStoreRouter for TcpRouter {
    fn block_store(&self, addr: &str) -> Result<Arc<dyn BlockStoreService>> {
        Ok(Arc::new(RemoteBlockStore::new(addr, self.timeout)))
    }
}
