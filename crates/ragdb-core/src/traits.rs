use crate::types::Context;

/// Maps texts to fixed-dimension, L2-normalised vectors.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Produces an answer for `question` grounded in `contexts`.
///
/// Only called with a non-empty context set that passed the relevance gate.
pub trait AnswerGenerator: Send + Sync {
    fn generate(&self, question: &str, contexts: &[Context]) -> anyhow::Result<String>;
}

/// Exact nearest-neighbour lookup returning ranked hits, best first.
pub trait VectorSearch: Send + Sync {
    fn search_vec(&self, query: &[f32], k: usize) -> crate::Result<Vec<crate::types::SearchHit>>;
}
