//! Error types for sentryd.
//!
//! None of these ever cross the sensor callback boundary: the session-close
//! path logs them and moves on.

use std::path::PathBuf;

/// Failures raised by the session store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to create data dir {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open sqlite db: {0}")]
    Open(#[source] rusqlite::Error),

    #[error("Failed to initialize schema: {0}")]
    Schema(#[source] rusqlite::Error),

    #[error("Failed to insert session: {0}")]
    Insert(#[source] rusqlite::Error),

    #[error("Failed to query sessions: {0}")]
    Query(#[source] rusqlite::Error),

    #[error("Stored session {id} is malformed: {details}")]
    Decode { id: i64, details: String },

    #[error("Session rejected: {0}")]
    Rejected(String),
}

/// Failures while loading `config.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    NoHome,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
