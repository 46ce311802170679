//! Error types for minetail.

use thiserror::Error;

use crate::fanout::FanoutError;
use crate::storage::StorageError;

/// Startup and CLI error type.
///
/// Per-line failures never reach this type; they are logged where they happen
/// and ingestion carries on.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Notification error: {0}")]
    Fanout(#[from] FanoutError),

    #[error("Config not found: {}", .0.display())]
    ConfigNotFound(std::path::PathBuf),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("No log path configured. Pass --log or set MINETAIL_LOG_PATH.")]
    MissingLogPath,

    #[error("Cannot open log file {}: {source}", .path.display())]
    LogUnavailable {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Player not found: {0}")]
    PlayerNotFound(String),
}
