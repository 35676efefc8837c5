//! Error types for the gate crate.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use tollgate_network::NetworkError;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("{kind} server failed to start: {source}")]
    Start {
        kind: &'static str,
        #[source]
        source: NetworkError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Why a close notification was not acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("lifecycle receiver is gone")]
    ServiceGone,

    #[error("close acknowledgement dropped")]
    AckDropped,

    #[error("close rejected: {0}")]
    Rejected(String),
}
