//! Exact inner-product index over fixed-dimension vectors.
//!
//! Vectors are stored row-major in one flat buffer; ordinal `i` occupies
//! `data[i * dim..(i + 1) * dim]`. Search is a linear scan, so the returned
//! top-k is always the true top-k.
//!
//! On-disk layout (little endian):
//!
//! ```text
//! magic "RGVI" | version u16 | generation u64 | dim u32 | count u64
//! | count * dim f32 | blake3(everything before) [32]
//! ```

use std::cmp::Ordering;
use std::path::Path;

use ragdb_core::{Error, Result};

use crate::fsio;

pub const INDEX_MAGIC: [u8; 4] = *b"RGVI";
pub const INDEX_FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 8 + 4 + 8;
const DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    dim: Option<usize>,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed dimension, or `None` until the first vector is inserted.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn len(&self) -> usize {
        match self.dim {
            Some(d) if d > 0 => self.data.len() / d,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends all vectors in order. Every vector is checked before anything is
    /// written, so a mismatch leaves the index unchanged.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        let Some(first) = vectors.first() else { return Ok(()) };
        let dim = self.dim.unwrap_or(first.len());
        if dim == 0 {
            return Err(Error::DimensionMismatch { expected: 1, actual: 0 });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::DimensionMismatch { expected: dim, actual: bad.len() });
        }
        self.dim = Some(dim);
        self.data.reserve(vectors.len() * dim);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// Returns up to `k` `(score, ordinal)` pairs by descending inner product.
    /// Equal scores keep insertion order (smaller ordinal first).
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, usize)>> {
        let Some(dim) = self.dim else { return Ok(Vec::new()) };
        if query.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: query.len() });
        }
        if k == 0 || self.data.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(f32, usize)> = self
            .data
            .chunks_exact(dim)
            .enumerate()
            .map(|(ordinal, row)| (inner_product(row, query), ordinal))
            .collect();
        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank_order);
            scored.truncate(k);
        }
        scored.sort_unstable_by(rank_order);
        Ok(scored)
    }

    /// Drops every vector at or after `len`. Used to undo an add whose persist failed.
    pub(crate) fn truncate(&mut self, len: usize) {
        if let Some(dim) = self.dim {
            self.data.truncate(len * dim);
        }
        if len == 0 {
            self.dim = None;
        }
    }

    pub fn to_bytes(&self, generation: u64) -> Vec<u8> {
        let dim = self.dim.unwrap_or(0);
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4 + DIGEST_LEN);
        bytes.extend_from_slice(&INDEX_MAGIC);
        bytes.extend_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&generation.to_le_bytes());
        bytes.extend_from_slice(&(dim as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let digest = blake3::hash(&bytes);
        bytes.extend_from_slice(digest.as_bytes());
        bytes
    }

    /// Decodes an index and the generation it was written with.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, u64)> {
        if bytes.len() < HEADER_LEN + DIGEST_LEN {
            return Err(corrupt(format!("index artifact too short ({} bytes)", bytes.len())));
        }
        let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
        if blake3::hash(body).as_bytes() != digest {
            return Err(corrupt("index artifact checksum mismatch"));
        }
        let mut cursor = 0usize;
        let magic: [u8; 4] = read_array(body, &mut cursor)?;
        if magic != INDEX_MAGIC {
            return Err(corrupt(format!("bad magic bytes: expected {INDEX_MAGIC:?}, found {magic:?}")));
        }
        let version = u16::from_le_bytes(read_array(body, &mut cursor)?);
        if version != INDEX_FORMAT_VERSION {
            return Err(corrupt(format!("unsupported index version {version} (expected {INDEX_FORMAT_VERSION})")));
        }
        let generation = u64::from_le_bytes(read_array(body, &mut cursor)?);
        let dim = u32::from_le_bytes(read_array(body, &mut cursor)?) as usize;
        let count = usize::try_from(u64::from_le_bytes(read_array(body, &mut cursor)?))
            .map_err(|_| corrupt("record count does not fit in memory"))?;
        let payload = &body[cursor..];
        let expected_len = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt("index size overflows"))?;
        if payload.len() != expected_len {
            return Err(corrupt(format!(
                "index payload is {} bytes, header promises {count} x {dim} f32",
                payload.len()
            )));
        }
        if dim == 0 && count > 0 {
            return Err(corrupt("non-empty index with zero dimension"));
        }
        let data = payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let dim = if dim == 0 { None } else { Some(dim) };
        Ok((Self { dim, data }, generation))
    }

    pub fn persist(&self, path: &Path, generation: u64) -> Result<()> {
        fsio::write_atomic(path, &self.to_bytes(generation))
    }

    pub fn load(path: &Path) -> Result<(Self, u64)> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

pub(crate) fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn rank_order(a: &(f32, usize), b: &(f32, usize)) -> Ordering {
    b.0.total_cmp(&a.0).then(a.1.cmp(&b.1))
}

fn read_array<const N: usize>(data: &[u8], cursor: &mut usize) -> Result<[u8; N]> {
    let end = *cursor + N;
    let slice = data.get(*cursor..end).ok_or_else(|| corrupt("truncated index header"))?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    *cursor = end;
    Ok(out)
}

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptPersistentState(msg.into())
}
