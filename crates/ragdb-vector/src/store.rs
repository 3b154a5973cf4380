use serde::{Deserialize, Serialize};
use std::path::Path;

use ragdb_core::{Error, Record, Result};

use crate::fsio;

pub const CHUNK_STORE_SCHEMA_VERSION: u32 = 1;

/// Records in ordinal order, aligned one-to-one with the vector index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkStore {
    records: Vec<Record>,
}

#[derive(Serialize)]
struct PersistedChunkStoreRef<'a> {
    schema_version: u32,
    generation: u64,
    records: &'a [Record],
}

#[derive(Deserialize)]
struct PersistedChunkStore {
    schema_version: u32,
    generation: u64,
    records: Vec<Record>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, records: impl IntoIterator<Item = Record>) {
        self.records.extend(records);
    }

    pub fn get(&self, ordinal: usize) -> Result<&Record> {
        self.records.get(ordinal).ok_or(Error::OutOfRange { ordinal, len: self.records.len() })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    pub fn to_json(&self, generation: u64) -> Result<Vec<u8>> {
        let persisted = PersistedChunkStoreRef {
            schema_version: CHUNK_STORE_SCHEMA_VERSION,
            generation,
            records: &self.records,
        };
        Ok(serde_json::to_vec_pretty(&persisted)?)
    }

    /// Decodes a store and the generation it was written with.
    pub fn from_json(bytes: &[u8]) -> Result<(Self, u64)> {
        let persisted: PersistedChunkStore = serde_json::from_slice(bytes)
            .map_err(|e| Error::CorruptPersistentState(format!("metadata artifact unreadable: {e}")))?;
        if persisted.schema_version != CHUNK_STORE_SCHEMA_VERSION {
            return Err(Error::CorruptPersistentState(format!(
                "Unsupported chunk store schema_version {} (expected {CHUNK_STORE_SCHEMA_VERSION})",
                persisted.schema_version
            )));
        }
        Ok((Self { records: persisted.records }, persisted.generation))
    }

    pub fn persist(&self, path: &Path, generation: u64) -> Result<()> {
        fsio::write_atomic(path, &self.to_json(generation)?)
    }

    pub fn load(path: &Path) -> Result<(Self, u64)> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }
}
