pub mod capture;
pub mod config;
pub mod enroll;
pub mod error;
pub mod extractor;
pub mod matcher;
pub mod recognize;
pub mod similarity;
pub mod store;

pub use error::{CaptureError, Error, ExtractionError, Result, StoreError};
pub use extractor::{DetectionMode, EmbeddingExtractor, OnnxExtractor};
pub use matcher::MatchResult;
pub use store::{EmbeddingRecord, VectorStore};

// Re-export vision types for convenience
pub use facematch_vision::{face, pipeline, video, Camera, Pipeline};
