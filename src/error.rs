//! Crate-wide error types.
//!
//! Per-packet and per-node failures (header validation, pool exhaustion,
//! sequence anomalies, node validation) are *not* represented here: they are
//! local, counted in [`crate::stats`], and never propagated. `Error` is
//! reserved for lifecycle operations (`start`, `stop`, `init`) that report a
//! result to the caller.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Result alias used throughout the crate for fallible lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind UDP socket at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no receiver could be started for pool '{pool}'")]
    AllReceiversFailed { pool: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("sink failed to open {path}: {source}")]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker task join timed out after {0:?}")]
    JoinTimeout(std::time::Duration),

    #[error("worker task panicked: {0}")]
    JoinPanic(String),
}
