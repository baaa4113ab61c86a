use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A page that could not be loaded. Never fatal: the page yields zero entries.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{page}: invalid page url ({reason})")]
    InvalidUrl { page: String, reason: String },

    #[error("{url}: request failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{}: read failed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{page}: timed out after {:.1}s", timeout.as_secs_f64())]
    Timeout { page: String, timeout: Duration },

    #[error("{page}: empty document")]
    Empty { page: String },
}

/// The page manifest could not be turned into a page list. Aborts the run.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read manifest {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest {} is not valid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("manifest pointer {pointer:?} matches nothing")]
    MissingPointer { pointer: String },

    #[error("manifest node at {at} must be an object, array or string, got {found}")]
    InvalidLeaf { at: String, found: &'static str },

    #[error("manifest root must be an object or array, got {found}")]
    InvalidRoot { found: &'static str },

    #[error("cannot scan {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Failure writing the search index. Aborts the run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot create {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open index {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("cannot create searchIndex schema: {0}")]
    Schema(#[source] rusqlite::Error),

    #[error("write failed after {attempted} entries attempted: {source}")]
    Write {
        attempted: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
}
