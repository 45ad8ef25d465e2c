//! Error kinds shared across the pipeline.
//!
//! Ingestion treats [`Error::Parse`] as a per-file skip; everything else
//! aborts the enclosing archive transaction. Upsert conflicts never surface
//! here — content-addressed inserts swallow them as success.

use thiserror::Error;

use crate::python::ParseError;

#[derive(Debug, Error)]
pub enum Error {
    /// A queried entity (archive, file, normalized file, snippet) is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The source file could not be parsed or decoded.
    #[error("parse failure: {0}")]
    Parse(#[from] ParseError),

    /// The archive could not be unpacked into the scratch directory.
    #[error("archive unpack failure: {0}")]
    ArchiveUnpack(String),

    /// Download or index fetch failed.
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// The storage backend rejected or lost the connection.
    #[error("storage unavailable: {0}")]
    Storage(#[from] sqlx::Error),

    /// The embedding backend failed for one segment; the snippet row keeps
    /// an unset embedding and remains eligible for backfill.
    #[error("embedder failure: {0}")]
    Embedder(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether ingestion may continue with the next file after this error.
    pub fn is_file_skip(&self) -> bool {
        matches!(self, Error::Parse(_))
    }
}
