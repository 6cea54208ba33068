//! Error types shared by the stores, the transport and the sync engine
//!
//! A rejected `UpdateFile` is not an error: it comes back in-band as
//! [`crate::UpdateOutcome::Conflict`].

use std::time::Duration;

use thiserror::Error;

use crate::hash::ContentHash;

/// Result alias used across surfsync crates
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can abort a store call or a sync cycle
#[derive(Error, Debug)]
pub enum Error {
    /// Block is not stored on the queried shard
    #[error("block {0} not found")]
    NotFound(ContentHash),

    /// Remote store could not be reached
    #[error("{addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Remote call did not finish before its deadline
    #[error("call to {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },

    /// Remote store answered with an error
    #[error("{addr} returned an error: {message}")]
    Remote { addr: String, message: String },

    /// The sync root is not something we can reconcile (nested dirs, bad names)
    #[error("malformed local state: {0}")]
    MalformedLocalState(String),

    /// Local read/write failure
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// Fetched data does not match the hash it was requested by
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Malformed frame or payload on the wire
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local index could not be encoded or decoded
    #[error("local index error: {0}")]
    Index(String),

    /// LMDB backend failure
    #[error("lmdb error: {0}")]
    Lmdb(#[from] heed::Error),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure came from talking to a remote store
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::Timeout { .. } | Self::Remote { .. }
        )
    }
}
