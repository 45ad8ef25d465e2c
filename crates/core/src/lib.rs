//! whence-core — package-archive indexing and source-file provenance lookup.
//!
//! The pipeline: parse a Python source file, normalize away incidental
//! variation (docstrings, type annotations), segment the canonical form into
//! function-sized chunks, fingerprint everything with SHA-256, embed new
//! segments, and persist the content-addressed graph
//! archive → file → normalized file → snippet in Postgres with a pgvector
//! index. Lookups run the same pipeline over a query file and match at three
//! tiers: exact bytes, normalized form, and nearest snippet embeddings.

pub mod config;
pub mod embed;
pub mod error;
pub mod fingerprint;
pub mod importer;
pub mod lookup;
pub mod norm;
pub mod pypi;
pub mod python;
pub mod split;
pub mod store;

pub use config::Settings;
pub use error::{Error, Result};
pub use importer::Importer;
pub use store::Store;
