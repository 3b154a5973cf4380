//! Domain types shared by the index, the retrieval pipeline and the CLI.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A dense embedding. Every vector in one index shares the same length.
pub type Vector = Vec<f32>;

/// Metadata stored alongside each indexed vector, at the same ordinal.
///
/// - `source`: origin identifier (file name)
/// - `path`: full path of the origin
/// - `page`: 1-based page within the origin, the position marker used for dedup
/// - `chunk_index`: window ordinal within the page
/// - `text`: the verbatim chunk text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    pub text: String,
}

impl Record {
    pub fn new(text: impl Into<String>) -> Self {
        Self { source: None, path: None, page: None, chunk_index: None, text: text.into() }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_chunk_index(mut self, chunk_index: usize) -> Self {
        self.chunk_index = Some(chunk_index);
        self
    }

    /// Checks the record before it enters the corpus. Read sites trust it afterwards.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::InvalidRecord("text is blank".to_string()));
        }
        if self.page == Some(0) {
            return Err(Error::InvalidRecord("page numbers start at 1".to_string()));
        }
        Ok(())
    }
}

/// A raw nearest-neighbour hit. `score` is inner-product similarity, higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f32,
    pub record: Record,
}

/// A retained, deduplicated hit handed to answer generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub text: String,
    pub record: Record,
    pub score: f32,
}
