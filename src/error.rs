//! Unified error type.

use std::path::PathBuf;

/// The error type returned by strata's fallible operations.
///
/// Application-level errors (404, 422, etc.) are expressed by writing a
/// status to the [`Context`](crate::Context), not as `Error`s. This type
/// surfaces infrastructure failures (binding a port) and the context
/// helpers that can fail: reading the request body, (de)serialising JSON,
/// parsing multipart uploads and saving them to disk.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("reading request body: {0}")]
    Body(#[source] BoxError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("multipart: {0}")]
    Multipart(#[from] multer::Error),

    #[error("no uploaded file in form field `{0}`")]
    MissingFile(String),

    #[error("creating directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Boxed error produced by request body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
