use std::path::PathBuf;

use thiserror::Error;

/// Failure to obtain a query image from a capture device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera {device} unavailable: {source:#}")]
    DeviceUnavailable {
        device: String,
        source: anyhow::Error,
    },

    #[error("camera returned no frame: {0:#}")]
    NoFrame(anyhow::Error),

    #[error("writing captured frame to {path}: {source}")]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Failure to turn an image into an embedding.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("cannot read image {path}: {source}")]
    UnreadableImage {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("no face detected in {path}")]
    NoFace { path: PathBuf },

    #[error("embedding model failed on {path}: {source:#}")]
    Model {
        path: PathBuf,
        source: anyhow::Error,
    },
}

/// Failure of the vector store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store at {endpoint} unavailable: {source}")]
    Unavailable {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("unsupported store endpoint: {0}")]
    UnsupportedEndpoint(String),

    #[error("store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding record: {0}")]
    Encode(#[from] postcard::Error),

    #[error("corrupt record at byte {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
}

/// Errors surfaced by enrollment and recognition.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("reading source directory {path}: {source}")]
    Source {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
