//! Oversample, dedup, gate, cite.
//!
//! The pipeline asks the index for `top_k * oversample` candidates, walks them
//! in ranked order keeping the first hit per fingerprint, stops at `top_k`, and
//! then refuses the whole set if even the best survivor scores below the
//! relevance threshold.

use std::collections::HashSet;

use serde::Serialize;

use ragdb_core::config::RetrievalSettings;
use ragdb_core::traits::VectorSearch;
use ragdb_core::types::{Context, SearchHit};
use ragdb_core::{Record, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub oversample: usize,
    pub min_relevance: f32,
    pub excerpt_chars: usize,
    pub fingerprint_prefix_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&RetrievalSettings::default())
    }
}

impl From<&RetrievalSettings> for PipelineConfig {
    fn from(s: &RetrievalSettings) -> Self {
        Self {
            oversample: s.oversample.max(1),
            min_relevance: s.min_relevance,
            excerpt_chars: s.excerpt_chars,
            fingerprint_prefix_chars: s.fingerprint_prefix_chars,
        }
    }
}

/// Display-oriented reference back to the origin of a retained context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub source: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

impl Citation {
    pub fn from_context(ctx: &Context, excerpt_chars: usize) -> Self {
        Self {
            source: ctx.record.source.clone().unwrap_or_else(|| "unknown".to_string()),
            path: ctx.record.path.clone().unwrap_or_default(),
            page: ctx.record.page,
            score: ctx.score,
            excerpt: excerpt(&ctx.text, excerpt_chars),
        }
    }
}

/// Why a retrieval produced nothing usable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoEvidence {
    /// The index returned no candidates (empty corpus or `top_k == 0`).
    NoHits,
    /// Candidates existed but the best one scored below the threshold.
    BelowThreshold { best_score: f32, threshold: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    /// Non-empty, deduplicated, descending by score, at most `top_k` long.
    /// `citations[i]` describes `contexts[i]`.
    Contexts { contexts: Vec<Context>, citations: Vec<Citation> },
    NoEvidence(NoEvidence),
}

impl Retrieval {
    pub fn contexts(&self) -> &[Context] {
        match self {
            Self::Contexts { contexts, .. } => contexts,
            Self::NoEvidence(_) => &[],
        }
    }

    pub fn citations(&self) -> &[Citation] {
        match self {
            Self::Contexts { citations, .. } => citations,
            Self::NoEvidence(_) => &[],
        }
    }

    pub fn is_no_evidence(&self) -> bool {
        matches!(self, Self::NoEvidence(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalPipeline {
    config: PipelineConfig,
}

impl RetrievalPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Retrieves with the configured relevance threshold.
    pub fn retrieve(&self, index: &dyn VectorSearch, query: &[f32], top_k: usize) -> Result<Retrieval> {
        self.retrieve_with_threshold(index, query, top_k, self.config.min_relevance)
    }

    pub fn retrieve_with_threshold(
        &self,
        index: &dyn VectorSearch,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Retrieval> {
        let fetch = top_k.saturating_mul(self.config.oversample);
        let hits = index.search_vec(query, fetch)?;
        tracing::debug!(top_k, fetch, candidates = hits.len(), "retrieved candidates");
        Ok(self.select(hits, top_k, threshold))
    }

    /// Dedup, truncate and gate an already-fetched candidate list.
    ///
    /// Candidates are re-ranked by score (stable, so equal scores keep their
    /// incoming order) before the first occurrence of each fingerprint wins.
    pub fn select(&self, mut hits: Vec<SearchHit>, top_k: usize, threshold: f32) -> Retrieval {
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut seen = HashSet::new();
        let mut contexts = Vec::with_capacity(top_k.min(hits.len()));
        for hit in hits {
            if contexts.len() >= top_k {
                break;
            }
            if !seen.insert(fingerprint(&hit.record, self.config.fingerprint_prefix_chars)) {
                continue;
            }
            contexts.push(Context { text: hit.record.text.clone(), record: hit.record, score: hit.score });
        }

        // Sorted above, so the first survivor is the best.
        let Some(best_score) = contexts.first().map(|c| c.score) else {
            return Retrieval::NoEvidence(NoEvidence::NoHits);
        };
        if best_score < threshold {
            tracing::info!(best_score, threshold, "best hit below relevance threshold");
            return Retrieval::NoEvidence(NoEvidence::BelowThreshold { best_score, threshold });
        }
        let citations = contexts.iter().map(|c| Citation::from_context(c, self.config.excerpt_chars)).collect();
        Retrieval::Contexts { contexts, citations }
    }
}

/// Dedup key: blake3 over source, page and the first `prefix_chars` chars of
/// text.
///
/// Each field is written with a presence tag and a length prefix, so no
/// choice of field contents can make two different triples hash alike, and
/// a missing source is distinct from an empty one.
pub fn fingerprint(record: &Record, prefix_chars: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    match record.source.as_deref() {
        Some(source) => {
            hasher.update(&[1]);
            hash_str(&mut hasher, source);
        }
        None => {
            hasher.update(&[0]);
        }
    }
    match record.page {
        Some(page) => {
            hasher.update(&[1]);
            hasher.update(&page.to_le_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
    let prefix_end = record.text.char_indices().nth(prefix_chars).map_or(record.text.len(), |(i, _)| i);
    hash_str(&mut hasher, &record.text[..prefix_end]);
    hasher.finalize().to_hex().to_string()
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn excerpt(text: &str, max_chars: usize) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => Some(format!("{}...", &text[..cut])),
        None => Some(text.to_string()),
    }
}
