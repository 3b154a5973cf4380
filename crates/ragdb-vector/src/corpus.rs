//! `VectorIndex` + `ChunkStore` kept in lockstep behind one lock.
//!
//! Consistency boundary: `add` only changes memory. Additions not followed by
//! a successful `persist` (or made through `add_and_persist`) are lost if the
//! process dies.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ragdb_core::config::DataSettings;
use ragdb_core::types::SearchHit;
use ragdb_core::{Error, Record, Result, Vector};

use crate::fsio;
use crate::index::VectorIndex;
use crate::store::ChunkStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusPaths {
    pub index_path: PathBuf,
    pub meta_path: PathBuf,
}

impl CorpusPaths {
    pub fn new(index_path: impl Into<PathBuf>, meta_path: impl Into<PathBuf>) -> Self {
        Self { index_path: index_path.into(), meta_path: meta_path.into() }
    }

    /// `vectors.idx` + `chunks.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("vectors.idx"), dir.join("chunks.json"))
    }
}

impl From<&DataSettings> for CorpusPaths {
    fn from(s: &DataSettings) -> Self {
        Self::new(s.index_path(), s.meta_path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusStats {
    pub count: usize,
    pub dim: Option<usize>,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct CorpusState {
    index: VectorIndex,
    store: ChunkStore,
}

pub struct IndexedCorpus {
    paths: CorpusPaths,
    state: RwLock<CorpusState>,
    /// Serialises persistence and holds the generation last written to disk.
    /// Always taken before `state`.
    persisted: Mutex<u64>,
}

impl IndexedCorpus {
    /// Loads the artifact pair at `paths`, or starts empty if neither exists.
    pub fn open(paths: CorpusPaths) -> Result<Self> {
        let (state, generation) = load_state(&paths)?;
        tracing::info!(
            count = state.index.len(),
            dim = ?state.index.dim(),
            generation,
            index = %paths.index_path.display(),
            "opened corpus"
        );
        Ok(Self { paths, state: RwLock::new(state), persisted: Mutex::new(generation) })
    }

    pub fn paths(&self) -> &CorpusPaths {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.read_state().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> Option<usize> {
        self.read_state().index.dim()
    }

    pub fn stats(&self) -> CorpusStats {
        let generation = *self.lock_persisted();
        let state = self.read_state();
        CorpusStats { count: state.index.len(), dim: state.index.dim(), generation }
    }

    /// Appends aligned vectors and records in memory. Call `persist` afterwards.
    pub fn add(&self, vectors: Vec<Vector>, records: Vec<Record>) -> Result<()> {
        validate_batch(&vectors, &records)?;
        let mut state = self.write_state();
        append(&mut state, vectors, records)
    }

    /// `add` followed by `persist` as one critical section. If persisting
    /// fails before the commit point the in-memory additions are rolled back.
    pub fn add_and_persist(&self, vectors: Vec<Vector>, records: Vec<Record>) -> Result<()> {
        self.add_and_persist_cancellable(vectors, records, &AtomicBool::new(false))
    }

    /// Like `add_and_persist`, but gives up with `Error::Cancelled` if `cancel`
    /// is set before the commit point. Once committed the call returns `Ok`
    /// whatever `cancel` says, so `Err` always means memory and disk are as
    /// they were before the call.
    pub fn add_and_persist_cancellable(
        &self,
        vectors: Vec<Vector>,
        records: Vec<Record>,
        cancel: &AtomicBool,
    ) -> Result<()> {
        validate_batch(&vectors, &records)?;
        let mut persisted = self.lock_persisted();
        let mut state = self.write_state();
        let before = state.index.len();
        append(&mut state, vectors, records)?;
        let next = *persisted + 1;
        if let Err(e) = write_artifacts(&self.paths, &state, next, cancel) {
            tracing::warn!(error = %e, "persist not committed, rolling back {} additions", state.index.len() - before);
            state.index.truncate(before);
            state.store.truncate(before);
            return Err(e);
        }
        *persisted = next;
        Ok(())
    }

    /// Ranked `(score, record)` hits; fewer than `top_k` if the corpus is
    /// smaller, empty if the corpus is empty.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let state = self.read_state();
        if state.index.is_empty() {
            return Ok(Vec::new());
        }
        state
            .index
            .search(query, top_k)?
            .into_iter()
            .map(|(score, ordinal)| Ok(SearchHit { score, record: state.store.get(ordinal)?.clone() }))
            .collect()
    }

    /// Writes both artifacts under a new generation.
    pub fn persist(&self) -> Result<()> {
        let mut persisted = self.lock_persisted();
        let state = self.read_state();
        let next = *persisted + 1;
        write_artifacts(&self.paths, &state, next, &AtomicBool::new(false))?;
        *persisted = next;
        tracing::debug!(generation = next, count = state.index.len(), "persisted corpus");
        Ok(())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CorpusState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CorpusState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_persisted(&self) -> MutexGuard<'_, u64> {
        self.persisted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_batch(vectors: &[Vector], records: &[Record]) -> Result<()> {
    if vectors.is_empty() || records.is_empty() || vectors.len() != records.len() {
        return Err(Error::EmptyBatch { vectors: vectors.len(), records: records.len() });
    }
    records.iter().try_for_each(Record::validate)
}

fn append(state: &mut CorpusState, vectors: Vec<Vector>, records: Vec<Record>) -> Result<()> {
    state.index.add(&vectors)?;
    state.store.append(records);
    debug_assert_eq!(state.index.len(), state.store.len());
    Ok(())
}

/// Stages both temp files, then renames the index and then the metadata.
///
/// The index rename is the commit point: a generation-`N` index next to a
/// generation-`N` `<meta>.tmp` is completed by `load_state`, so a failed
/// metadata rename after it is logged, not returned. Before it, staged files
/// are removed and the error (or `Cancelled`) is returned.
fn write_artifacts(paths: &CorpusPaths, state: &CorpusState, generation: u64, cancel: &AtomicBool) -> Result<()> {
    let index_bytes = state.index.to_bytes(generation);
    let meta_bytes = state.store.to_json(generation)?;
    let index_tmp = fsio::write_tmp(&paths.index_path, &index_bytes)?;
    let meta_tmp = match fsio::write_tmp(&paths.meta_path, &meta_bytes) {
        Ok(tmp) => tmp,
        Err(e) => {
            fsio::discard(&index_tmp);
            return Err(e);
        }
    };
    if cancel.load(Ordering::Acquire) {
        fsio::discard(&index_tmp);
        fsio::discard(&meta_tmp);
        return Err(Error::Cancelled);
    }
    if let Err(e) = fsio::commit(&index_tmp, &paths.index_path) {
        fsio::discard(&index_tmp);
        fsio::discard(&meta_tmp);
        return Err(e);
    }
    if let Err(e) = fsio::commit(&meta_tmp, &paths.meta_path) {
        tracing::warn!(error = %e, generation, "metadata rename failed after commit, completed on next open");
    }
    Ok(())
}

fn load_state(paths: &CorpusPaths) -> Result<(CorpusState, u64)> {
    let index_exists = paths.index_path.exists();
    let meta_exists = paths.meta_path.exists();
    if !index_exists && !meta_exists {
        return Ok((CorpusState::default(), 0));
    }
    if !index_exists {
        return Err(Error::CorruptPersistentState(format!(
            "metadata {} exists without index {}",
            paths.meta_path.display(),
            paths.index_path.display()
        )));
    }
    let (index, generation) = VectorIndex::load(&paths.index_path)?;
    let store = load_store_for_generation(paths, generation, meta_exists)?;
    if store.len() != index.len() {
        return Err(Error::CorruptPersistentState(format!(
            "index holds {} vectors but metadata holds {} records",
            index.len(),
            store.len()
        )));
    }
    Ok((CorpusState { index, store }, generation))
}

fn load_store_for_generation(paths: &CorpusPaths, generation: u64, meta_exists: bool) -> Result<ChunkStore> {
    let mut found = None;
    if meta_exists {
        let (store, meta_generation) = ChunkStore::load(&paths.meta_path)?;
        if meta_generation == generation {
            return Ok(store);
        }
        found = Some(meta_generation);
    }
    let tmp = fsio::tmp_path(&paths.meta_path);
    if tmp.exists() {
        let (store, tmp_generation) = ChunkStore::load(&tmp)?;
        if tmp_generation == generation {
            tracing::warn!(generation, "completing interrupted metadata rename");
            fsio::commit(&tmp, &paths.meta_path)?;
            return Ok(store);
        }
    }
    Err(Error::CorruptPersistentState(match found {
        Some(g) => format!("index generation {generation} does not match metadata generation {g}"),
        None => format!(
            "index {} exists without metadata {}",
            paths.index_path.display(),
            paths.meta_path.display()
        ),
    }))
}

impl ragdb_core::traits::VectorSearch for IndexedCorpus {
    fn search_vec(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.search(query, k)
    }
}
