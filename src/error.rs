//! Error taxonomy shared by the store, the pipeline, and the enrichers.

use std::path::PathBuf;

/// Store error type alias (diesel result errors).
pub type StoreError = diesel::result::Error;

/// Errors surfaced by enrichers.
///
/// A `Failed` outcome never crosses a queue boundary: the worker applies
/// the stage's required/optional policy and the error stays local to the
/// stage that produced it.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// The store has no row for the requested key.
    #[error("no record for key {0}")]
    MissingRecord(String),

    /// The store row exists but the path does not resolve on disk.
    #[error("file not found: {0}")]
    MissingFile(PathBuf),

    /// Decode or filesystem error while reading the source file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode failure (corrupt or partially-written file).
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// The external backend (captioning endpoint) is unreachable or errored.
    #[error("backend error: {0}")]
    Backend(String),

    /// Store read/write failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
