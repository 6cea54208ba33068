//! surfsync-server: hosts the metadata store or one block store shard
//!
//! Both roles speak the framed TCP protocol from `surfsync-transport`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use surfsync_core::{
    BlockStoreService, LmdbBlockStore, MemoryBlockStore, MetaStoreService, MetadataStore,
    SurfsyncConfig,
};
use surfsync_transport::{serve_block_store, serve_meta_store};

#[derive(Parser)]
#[command(name = "surfsync-server")]
#[command(version)]
#[command(about = "Metadata and block store server for surfsync")]
struct Cli {
    /// Config file (defaults to ./surfsync.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the metadata store
    Meta {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<String>,

        /// Block store shard address (repeat for each shard)
        #[arg(short = 'b', long = "block-store")]
        block_stores: Vec<String>,
    },
    /// Run one block store shard
    Block {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<String>,

        /// Keep blocks in an LMDB environment under this directory
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
    /// Print version and exit
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = SurfsyncConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Version => {
            eprintln!("surfsync-server {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Meta {
            listen,
            block_stores,
        } => {
            let listen = listen
                .or(config.server.listen)
                .ok_or_else(|| eyre!("no listen address: pass --listen or set server.listen"))?;
            let block_stores = if block_stores.is_empty() {
                config.server.block_stores
            } else {
                block_stores
            };
            run_meta(&listen, block_stores).await?;
        }
        Commands::Block { listen, data_dir } => {
            let listen = listen
                .or(config.server.listen)
                .ok_or_else(|| eyre!("no listen address: pass --listen or set server.listen"))?;
            run_block(&listen, data_dir.or(config.server.data_dir)).await?;
        }
    }

    Ok(())
}

async fn run_meta(listen: &str, block_stores: Vec<String>) -> Result<()> {
    info!("Block store shards: {}", block_stores.join(", "));
    let store: Arc<dyn MetaStoreService> = Arc::new(MetadataStore::new(block_stores)?);
    let listener = TcpListener::bind(listen).await?;
    serve_meta_store(listener, store).await?;
    Ok(())
}

async fn run_block(listen: &str, data_dir: Option<PathBuf>) -> Result<()> {
    let store: Arc<dyn BlockStoreService> = match data_dir {
        Some(dir) => {
            let store = LmdbBlockStore::open(&dir)?;
            info!(
                "Opened block store at {} ({} blocks)",
                dir.display(),
                store.len()?
            );
            Arc::new(store)
        }
        None => {
            info!("Using in-memory block store");
            Arc::new(MemoryBlockStore::new())
        }
    };

    let listener = TcpListener::bind(listen).await?;
    serve_block_store(listener, store).await?;
    Ok(())
}
