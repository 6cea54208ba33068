//! Request servers for block and metadata stores
//!
//! One task per accepted connection. A connection may carry any number of
//! request/response exchanges and ends at EOF.

use std::sync::Arc;

use async_trait::async_trait;
use surfsync_core::protocol::{Request, Response};
use surfsync_core::{BlockStoreService, Error, MetaStoreService, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::frame::{read_frame, write_frame};

/// Turns one decoded request into one response
#[async_trait]
trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Response;
}

struct BlockHandler(Arc<dyn BlockStoreService>);

#[async_trait]
impl Handler for BlockHandler {
    async fn handle(&self, request: Request) -> Response {
        let store = &self.0;
        let result = match request {
            Request::GetBlock(hash) => match store.get_block(&hash).await {
                Ok(block) => Ok(Response::Block(block)),
                Err(Error::NotFound(hash)) => Ok(Response::NotFound(hash)),
                Err(e) => Err(e),
            },
            Request::PutBlock(block) => store.put_block(block).await.map(Response::Stored),
            Request::MissingBlocks(hashes) => {
                store.missing_blocks(&hashes).await.map(Response::Hashes)
            }
            Request::GetAllBlockHashes => store.get_all_block_hashes().await.map(Response::Hashes),
            other => Err(Error::Protocol(format!(
                "block store cannot serve {other:?}"
            ))),
        };
        result.unwrap_or_else(|e| Response::Error(e.to_string()))
    }
}

struct MetaHandler(Arc<dyn MetaStoreService>);

#[async_trait]
impl Handler for MetaHandler {
    async fn handle(&self, request: Request) -> Response {
        let store = &self.0;
        let result = match request {
            Request::GetFileInfoMap => store.get_file_info_map().await.map(Response::FileInfoMap),
            Request::UpdateFile(proposed) => store.update_file(proposed).await.map(Response::Update),
            Request::GetBlockStoreMap(hashes) => store
                .get_block_store_map(&hashes)
                .await
                .map(Response::BlockStoreMap),
            Request::GetBlockStoreAddrs => store.get_block_store_addrs().await.map(Response::Addrs),
            other => Err(Error::Protocol(format!(
                "metadata store cannot serve {other:?}"
            ))),
        };
        result.unwrap_or_else(|e| Response::Error(e.to_string()))
    }
}

/// Serve a block store on `listener` until the task is dropped
///
/// # Errors
/// Returns an error if accepting a connection fails
pub async fn serve_block_store(
    listener: TcpListener,
    store: Arc<dyn BlockStoreService>,
) -> Result<()> {
    serve(listener, Arc::new(BlockHandler(store)), "block store").await
}

/// Serve the metadata store on `listener` until the task is dropped
///
/// # Errors
/// Returns an error if accepting a connection fails
pub async fn serve_meta_store(
    listener: TcpListener,
    store: Arc<dyn MetaStoreService>,
) -> Result<()> {
    serve(listener, Arc::new(MetaHandler(store)), "metadata store").await
}

async fn serve<H: Handler>(listener: TcpListener, handler: Arc<H>, role: &str) -> Result<()> {
    info!("Serving {role} on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "accepted connection");
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, handler.as_ref()).await {
                warn!(%peer, "connection error: {e}");
            }
        });
    }
}

async fn handle_connection<H: Handler>(mut stream: TcpStream, handler: &H) -> Result<()> {
    stream.set_nodelay(true)?;
    while let Some(frame) = read_frame(&mut stream).await? {
        let response = match Request::decode(frame) {
            Ok(request) => handler.handle(request).await,
            Err(e) => Response::Error(e.to_string()),
        };
        write_frame(&mut stream, &response.encode()).await?;
    }
    Ok(())
}
