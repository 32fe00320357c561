use super::{EmbeddingRecord, Records, VectorStore};
use crate::error::StoreError;

/// Volatile store, scanned in insertion order.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Vec<EmbeddingRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<EmbeddingRecord> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = EmbeddingRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl VectorStore for MemoryStore {
    fn insert(&mut self, record: EmbeddingRecord) -> Result<(), StoreError> {
        self.records.push(record);
        Ok(())
    }

    fn fetch_all(&self) -> Result<Records<'_>, StoreError> {
        Ok(Box::new(self.records.iter().cloned().map(Ok)))
    }

    fn purge(&mut self) -> Result<(), StoreError> {
        self.records.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_kept_in_order() {
        let mut store = MemoryStore::new();
        store.insert(EmbeddingRecord::new("a.png", vec![1.0])).unwrap();
        store.insert(EmbeddingRecord::new("a.png", vec![2.0])).unwrap();
        assert_eq!(store.len(), 2);

        let all: Vec<_> = store.fetch_all().unwrap().map(Result::unwrap).collect();
        assert_eq!(all[0].embedding, vec![1.0]);
        assert_eq!(all[1].embedding, vec![2.0]);

        store.purge().unwrap();
        assert!(store.is_empty());
    }
}
