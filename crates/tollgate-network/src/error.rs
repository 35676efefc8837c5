//! Error types for connections and servers.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Per-connection failures. Any of these ends the connection.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("connection closed")]
    Closed,

    #[error("message too long: {len} bytes (max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("message too short: {len} bytes (min {min})")]
    MessageTooShort { len: usize, min: usize },

    #[error("pending write queue full ({capacity})")]
    PendingWriteOverflow { capacity: usize },

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Server startup failures.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] io::Error),

    #[error("invalid length prefix size {0} (expected 1, 2 or 4)")]
    InvalidLenMsgLen(usize),

    #[error("failed to read TLS file {}: {source}", path.display())]
    TlsFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no private key found in {}", path.display())]
    TlsNoKey { path: PathBuf },

    #[error("no certificate found in {}", path.display())]
    TlsNoCert { path: PathBuf },

    #[error("TLS needs both a certificate file and a key file")]
    TlsIncomplete,

    #[error("invalid TLS configuration: {0}")]
    TlsConfig(#[from] tokio_rustls::rustls::Error),
}
