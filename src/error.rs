//! Error taxonomy for the indexing pipeline.
//!
//! Per-file failures (`FileAccess`, `Decode`) are contained at the work-item
//! level and never propagate past the worker that hit them; only `StoreOpen`
//! and `Scan` surface as run-level failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Cannot open cache database {path}: {source}")]
    StoreOpen {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("Cache store operation failed: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Cannot traverse library root {path}: {source}")]
    Scan {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("Failed to read image file: {0}")]
    FileAccess(String),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Record serialization failed: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    #[error("Record deserialization failed: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;
