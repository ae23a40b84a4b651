use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Failures of the raw report stream (gpsd connection, device gone, daemon restart).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to connect to report source at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Report stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report stream closed by peer")]
    Closed,

    #[error("Gave up connecting after {0} attempts")]
    AttemptsExhausted(u32),
}

/// Durability failures of the offline queue file.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Offline queue storage unavailable at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode fix for offline storage: {0}")]
    Encode(#[from] CodecError),

    #[error("Replay interrupted after {sent} entries: {source}")]
    ReplayInterrupted {
        sent: usize,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Empty frame")]
    Empty,
}

/// Failures that prevent the relay from starting.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Startup I/O error: {0}")]
    Io(#[from] std::io::Error),
}
