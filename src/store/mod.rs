//! Identifier-to-embedding storage.
//!
//! A store holds one named collection of [`EmbeddingRecord`]s. Writes are
//! appends: identifiers are not unique, and a duplicate identifier simply
//! adds another record that takes part in every later search.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::StoreConfig;
use crate::error::StoreError;

/// One enrolled face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Where the embedding came from, usually the source file name.
    pub identifier: String,
    pub embedding: Vec<f32>,
}

impl EmbeddingRecord {
    pub fn new(identifier: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            identifier: identifier.into(),
            embedding,
        }
    }

    pub fn dim(&self) -> usize {
        self.embedding.len()
    }
}

/// Lazy scan over a store. Each item is read when the iterator is advanced.
pub type Records<'a> = Box<dyn Iterator<Item = Result<EmbeddingRecord, StoreError>> + 'a>;

pub trait VectorStore {
    /// Persist a record. Returns once the record is durable.
    fn insert(&mut self, record: EmbeddingRecord) -> Result<(), StoreError>;

    /// Start a fresh scan of every stored record.
    fn fetch_all(&self) -> Result<Records<'_>, StoreError>;

    /// Drop every record of the collection.
    fn purge(&mut self) -> Result<(), StoreError>;
}

pub const MEMORY_ENDPOINT: &str = ":memory:";

/// Where a store endpoint points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Memory,
    Directory(PathBuf),
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self, StoreError> {
        let endpoint = endpoint.trim();
        if endpoint == MEMORY_ENDPOINT {
            return Ok(Endpoint::Memory);
        }
        if let Some(path) = endpoint.strip_prefix("file://") {
            if path.is_empty() {
                return Err(StoreError::UnsupportedEndpoint(endpoint.to_string()));
            }
            return Ok(Endpoint::Directory(PathBuf::from(path)));
        }
        if endpoint.is_empty() || endpoint.contains("://") {
            return Err(StoreError::UnsupportedEndpoint(endpoint.to_string()));
        }
        Ok(Endpoint::Directory(PathBuf::from(endpoint)))
    }
}

/// Connect to the configured store. The returned handle is meant to live for
/// the rest of the process.
pub fn open(cfg: &StoreConfig) -> Result<Box<dyn VectorStore>, StoreError> {
    match Endpoint::parse(&cfg.endpoint)? {
        Endpoint::Memory => {
            log::debug!("using in-memory store");
            Ok(Box::new(MemoryStore::new()))
        }
        Endpoint::Directory(dir) => Ok(Box::new(FileStore::open(&dir, &cfg.collection)?)),
    }
}
