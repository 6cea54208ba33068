//! surfsync-transport: TCP transport layer
//!
//! Carries store calls over framed TCP, serves stores to remote clients,
//! and wires up an in-process cluster for tests and local use.

pub mod frame;
pub mod local;
pub mod server;
pub mod tcp;

pub use frame::{read_frame, write_frame};
pub use local::LocalCluster;
pub use server::{serve_block_store, serve_meta_store};
pub use tcp::{RemoteBlockStore, RemoteMetaStore, TcpRouter};
