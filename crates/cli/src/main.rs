//! surfsync: sync a flat directory against a sharded block store
//!
//! Every cycle pushes local changes to the metadata store and the block
//! store shards, pulls whatever other clients committed, and records the
//! remote state as the new local index.

mod debug_log;
mod progress;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, builder::Styles};
use color_eyre::Result;
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use surfsync_core::{
    BlockStoreService, ChunkConfig, ClientConfig, INDEX_FILE, LocalIndex, MetaStoreService,
    Scanner, SurfsyncConfig, SyncEngine, SyncOptions,
};
use surfsync_transport::{RemoteBlockStore, RemoteMetaStore, TcpRouter};

use crate::progress::SyncProgress;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "surfsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Sync a flat directory against a sharded block store")]
#[command(long_about = r#"
surfsync keeps a flat directory in step with a shared remote store.

Files are split into fixed-size blocks, spread over block store shards by
a consistent hash ring, and versioned by a single metadata store. When two
clients change the same file, the first accepted version wins and the
other client pulls it.

Examples:
  surfsync sync ./shared                     One sync cycle
  surfsync watch ./shared                    Sync on every change
  surfsync --meta 10.0.0.1:8080 remote       Show remote file versions
  surfsync scan ./shared --format json       Show local blocks
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./surfsync.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Metadata store address
    #[arg(short, long, global = true)]
    meta: Option<String>,

    /// Block size in bytes; must match every other client
    #[arg(short, long, global = true)]
    block_size: Option<usize>,

    /// Per-call deadline in milliseconds
    #[arg(short, long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle
    Sync {
        /// Directory to sync
        dir: PathBuf,
    },

    /// Sync, then sync again on every change
    Watch {
        /// Directory to sync
        dir: PathBuf,

        /// Debounce delay in milliseconds
        #[arg(short, long, default_value = "200")]
        debounce: u64,
    },

    /// Chunk a directory and print its snapshot
    Scan {
        /// Directory to scan
        dir: PathBuf,

        /// Output format (json, summary)
        #[arg(short, long, default_value = "summary")]
        format: String,
    },

    /// Print the local index of a directory
    Index {
        /// Synced directory
        dir: PathBuf,
    },

    /// Print the remote file versions
    Remote,

    /// List the blocks stored on every shard
    Blocks,

    /// Show version and build info
    Version,
}

impl Cli {
    /// Config file values with command line overrides applied
    fn client_config(&self) -> Result<ClientConfig> {
        let mut client = SurfsyncConfig::load(self.config.as_deref())?.client;
        if let Some(meta) = &self.meta {
            client.meta_addr.clone_from(meta);
        }
        if let Some(block_size) = self.block_size {
            client.block_size = block_size;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            client.timeout_ms = timeout_ms;
        }
        client.chunk_config()?;
        Ok(client)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let run_log = debug_log::init(cli.verbose);
    debug!("Run log at {}", run_log.path.display());

    let client = cli.client_config()?;

    match &cli.command {
        Commands::Version => {
            eprintln!("surfsync {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        }
        Commands::Scan { dir, format } => {
            scan_command(dir, format, client.chunk_config()?)?;
        }
        Commands::Index { dir } => {
            index_command(dir)?;
        }
        Commands::Sync { dir } => {
            sync_command(dir, &client).await?;
        }
        Commands::Watch { dir, debounce } => {
            watch_command(dir, &client, *debounce).await?;
        }
        Commands::Remote => {
            remote_command(&client).await?;
        }
        Commands::Blocks => {
            blocks_command(&client).await?;
        }
    }

    drop(run_log);
    Ok(())
}

fn engine(dir: &Path, client: &ClientConfig) -> Result<SyncEngine<RemoteMetaStore, TcpRouter>> {
    let options = SyncOptions::try_from(client)?;
    Ok(SyncEngine::new(
        dir,
        options,
        RemoteMetaStore::new(&client.meta_addr, client.timeout()),
        TcpRouter::new(client.timeout()),
    ))
}

fn scan_command(dir: &Path, format: &str, chunk: ChunkConfig) -> Result<()> {
    info!("Scanning {}...", dir.display());

    let snapshot = Scanner::new(dir, chunk).scan()?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&snapshot)?;
            println!("{json}");
        }
        _ => {
            eprintln!("Files: {}", snapshot.len());
            eprintln!(
                "Total size: {}",
                humansize::format_size(snapshot.total_size(), humansize::BINARY)
            );

            if snapshot.len() <= 20 {
                eprintln!("\nFiles:");
                for (name, file) in &snapshot.files {
                    eprintln!(
                        "  {name} ({} bytes, {} blocks)",
                        file.size,
                        file.blocks.len()
                    );
                }
            }
        }
    }

    Ok(())
}

fn index_command(dir: &Path) -> Result<()> {
    let index = LocalIndex::load(dir)?;
    if index.is_empty() {
        eprintln!("No index in {}", dir.display());
        return Ok(());
    }

    for (name, meta) in &index.files {
        println!("{name:<32} v{:<6} {}", meta.version, describe_blocks(meta));
    }
    Ok(())
}

async fn sync_command(dir: &Path, client: &ClientConfig) -> Result<()> {
    let engine = engine(dir, client)?;
    run_cycle(&engine).await
}

async fn run_cycle(engine: &SyncEngine<RemoteMetaStore, TcpRouter>) -> Result<()> {
    let mut progress = SyncProgress::new();
    progress.start(engine.root());

    match engine.run_cycle().await {
        Ok(report) => {
            progress.finish(&report);
            Ok(())
        }
        Err(e) => {
            progress.failed(&e);
            Err(e.into())
        }
    }
}

async fn watch_command(dir: &Path, client: &ClientConfig, debounce_ms: u64) -> Result<()> {
    let root = dir.canonicalize()?;
    let engine = engine(&root, client)?;

    info!("Watching {} -> {}", root.display(), client.meta_addr);

    // Initial sync
    if let Err(e) = run_cycle(&engine).await {
        error!("Sync failed: {e}");
    }

    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut debouncer = new_debouncer(
        Duration::from_millis(debounce_ms),
        None,
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                let _ = tx.send(events);
            }
            Err(errors) => {
                for e in errors {
                    warn!("Watch error: {e}");
                }
            }
        },
    )?;

    debouncer.watch(&root, RecursiveMode::NonRecursive)?;

    info!("Watching for changes (Ctrl+C to stop)...");

    // Cycles run inline, so a new one never starts before the last ends
    while let Some(events) = rx.recv().await {
        let mut paths: Vec<PathBuf> = events
            .iter()
            .flat_map(|e| e.paths.iter().cloned())
            .collect();
        while let Ok(more) = rx.try_recv() {
            paths.extend(more.iter().flat_map(|e| e.paths.iter().cloned()));
        }

        if only_touches_index(&paths) {
            continue;
        }

        info!("Detected {} changed paths, syncing...", paths.len());
        for path in &paths {
            debug!("  Changed: {}", path.display());
        }

        if let Err(e) = run_cycle(&engine).await {
            error!("Sync failed: {e}");
        }
    }

    Ok(())
}

/// True when a batch of events carries nothing but our own index writes
fn only_touches_index(paths: &[PathBuf]) -> bool {
    paths
        .iter()
        .all(|p| p.file_name().is_some_and(|name| name == INDEX_FILE))
}

async fn remote_command(client: &ClientConfig) -> Result<()> {
    let meta = RemoteMetaStore::new(&client.meta_addr, client.timeout());
    let files = meta.get_file_info_map().await?;

    if files.is_empty() {
        eprintln!("No files on {}", client.meta_addr);
        return Ok(());
    }

    for (name, meta) in &files {
        println!("{name:<32} v{:<6} {}", meta.version, describe_blocks(meta));
    }
    Ok(())
}

async fn blocks_command(client: &ClientConfig) -> Result<()> {
    let meta = RemoteMetaStore::new(&client.meta_addr, client.timeout());
    let addrs = meta.get_block_store_addrs().await?;

    for addr in addrs {
        let store = RemoteBlockStore::new(&addr, client.timeout());
        match store.get_all_block_hashes().await {
            Ok(hashes) => {
                println!("{addr} ({} blocks)", hashes.len());
                for hash in hashes {
                    println!("  {}", hash.to_hex());
                }
            }
            Err(e) => {
                warn!("{addr}: {e}");
                println!("{addr} (unavailable)");
            }
        }
    }
    Ok(())
}

fn describe_blocks(meta: &surfsync_core::FileMetadata) -> String {
    if meta.is_tombstone() {
        "deleted".to_string()
    } else if meta.is_empty_content() {
        "empty".to_string()
    } else {
        format!("{} blocks", meta.blocks.len())
    }
}
