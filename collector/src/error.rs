//! Error types for collector operations.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Collector not initialized at {0}")]
    NotInitialized(PathBuf),

    #[error("Collector already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Schema not provisioned: {0}")]
    NotProvisioned(String),

    #[error("Snapshot source error: {0}")]
    Snapshot(String),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
}

pub type Result<T> = std::result::Result<T, Error>;
