//! Async facade over the corpus, the embedder and the generator.
//!
//! Every blocking step (model inference, index scan, file I/O, HTTP) runs on
//! tokio's blocking pool. Embedding and generation are bounded by a timeout.
//! Persistence is cancelled on timeout only up to its commit point, so an
//! `Err` from `ingest` always means nothing was added.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use serde::Serialize;

use ragdb_core::config::Settings;
use ragdb_core::data_processor::{ChunkingConfig, DataProcessor};
use ragdb_core::traits::{AnswerGenerator, Embedder};
use ragdb_core::types::SearchHit;
use ragdb_core::{Error, Record, Vector};
use ragdb_vector::{CorpusStats, IndexedCorpus};

use crate::pipeline::{Citation, NoEvidence, PipelineConfig, Retrieval, RetrievalPipeline};
use crate::prompt::NO_EVIDENCE_ANSWER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTimeouts {
    pub embed: Duration,
    pub persist: Duration,
    pub generate: Duration,
}

impl Default for ServiceTimeouts {
    fn default() -> Self {
        Self { embed: Duration::from_secs(30), persist: Duration::from_secs(60), generate: Duration::from_secs(120) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub query: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    /// Set when the fixed refusal was returned without calling the generator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_evidence: Option<NoEvidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub count: usize,
    pub dim: Option<usize>,
    pub generation: u64,
    pub embedder_dim: usize,
    pub index_path: PathBuf,
    pub meta_path: PathBuf,
}

pub struct RagService {
    corpus: Arc<IndexedCorpus>,
    embedder: Arc<dyn Embedder>,
    generator: Option<Arc<dyn AnswerGenerator>>,
    pipeline: RetrievalPipeline,
    chunking: ChunkingConfig,
    timeouts: ServiceTimeouts,
}

impl RagService {
    pub fn new(corpus: Arc<IndexedCorpus>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            corpus,
            embedder,
            generator: None,
            pipeline: RetrievalPipeline::default(),
            chunking: ChunkingConfig::default(),
            timeouts: ServiceTimeouts::default(),
        }
    }

    /// Pipeline, chunking and timeouts taken from `settings`.
    pub fn from_settings(corpus: Arc<IndexedCorpus>, embedder: Arc<dyn Embedder>, settings: &Settings) -> Self {
        Self::new(corpus, embedder)
            .with_pipeline(RetrievalPipeline::new(PipelineConfig::from(&settings.retrieval)))
            .with_chunking(ChunkingConfig::from(&settings.chunking))
            .with_timeouts(ServiceTimeouts {
                embed: Duration::from_secs(settings.embedding.timeout_secs),
                persist: Duration::from_secs(settings.data.persist_timeout_secs),
                generate: Duration::from_secs(settings.generation.timeout_secs),
            })
    }

    pub fn with_generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_pipeline(mut self, pipeline: RetrievalPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_timeouts(mut self, timeouts: ServiceTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn corpus(&self) -> &Arc<IndexedCorpus> {
        &self.corpus
    }

    /// Chunks a `.txt` file or directory and ingests the result.
    pub async fn ingest_path(&self, path: PathBuf) -> Result<usize> {
        let chunking = self.chunking;
        let records = run_blocking("chunking", None, move || {
            DataProcessor::with_config(chunking).process_path(&path).map_err(anyhow::Error::from)
        })
        .await?;
        self.ingest(records).await
    }

    /// Embeds and durably adds `records`; returns how many were added.
    pub async fn ingest(&self, records: Vec<Record>) -> Result<usize> {
        let submitted = records.len();
        let records: Vec<Record> = records.into_iter().filter(|r| !r.text.trim().is_empty()).collect();
        if records.is_empty() {
            return Err(Error::EmptyBatch { vectors: 0, records: 0 }.into());
        }
        if records.len() < submitted {
            tracing::info!(skipped = submitted - records.len(), "skipping blank records");
        }

        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = self.embed(texts).await?;

        let added = records.len();
        self.persist_batch(vectors, records).await?;
        tracing::info!(added, total = self.corpus.len(), "ingested records");
        Ok(added)
    }

    /// Ranked hits without dedup or gating.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let query_vector = self.embed_query(query).await?;
        let corpus = Arc::clone(&self.corpus);
        run_blocking("search", None, move || corpus.search(&query_vector, top_k).map_err(anyhow::Error::from)).await
    }

    /// Deduplicated, gated contexts and citations for `query`.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Retrieval> {
        let query_vector = self.embed_query(query).await?;
        let corpus = Arc::clone(&self.corpus);
        let pipeline = self.pipeline.clone();
        run_blocking("retrieval", None, move || {
            pipeline.retrieve(&*corpus, &query_vector, top_k).map_err(anyhow::Error::from)
        })
        .await
    }

    pub async fn ask(&self, question: &str, top_k: usize) -> Result<Answer> {
        let (contexts, citations) = match self.retrieve(question, top_k).await? {
            Retrieval::NoEvidence(reason) => {
                return Ok(Answer {
                    query: question.to_string(),
                    answer: NO_EVIDENCE_ANSWER.to_string(),
                    citations: Vec::new(),
                    no_evidence: Some(reason),
                });
            }
            Retrieval::Contexts { contexts, citations } => (contexts, citations),
        };
        let generator = self.generator.clone().ok_or_else(|| anyhow!("no answer generator configured"))?;
        let q = question.to_string();
        let answer = run_blocking("generation", Some(self.timeouts.generate), move || generator.generate(&q, &contexts))
            .await?;
        Ok(Answer { query: question.to_string(), answer, citations, no_evidence: None })
    }

    pub fn status(&self) -> ServiceStatus {
        let CorpusStats { count, dim, generation } = self.corpus.stats();
        let paths = self.corpus.paths();
        ServiceStatus {
            count,
            dim,
            generation,
            embedder_dim: self.embedder.dim(),
            index_path: paths.index_path.clone(),
            meta_path: paths.meta_path.clone(),
        }
    }

    /// On timeout the write is asked to stop before its commit point and its
    /// real outcome is awaited: a batch that committed is reported as added.
    async fn persist_batch(&self, vectors: Vec<Vector>, records: Vec<Record>) -> Result<()> {
        let limit = self.timeouts.persist;
        let cancel = Arc::new(AtomicBool::new(false));
        let corpus = Arc::clone(&self.corpus);
        let flag = Arc::clone(&cancel);
        let mut task =
            tokio::task::spawn_blocking(move || corpus.add_and_persist_cancellable(vectors, records, &flag));
        let joined = match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                cancel.store(true, Ordering::Release);
                tracing::warn!(?limit, "persist exceeded its timeout, cancelling before commit");
                task.await
            }
        };
        match joined.context("persist task failed")? {
            Ok(()) => Ok(()),
            Err(Error::Cancelled) => bail!("persist timed out after {limit:?}; nothing was added"),
            Err(e) => Err(e.into()),
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vector> {
        if query.trim().is_empty() {
            bail!("query is empty");
        }
        self.embed(vec![query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| anyhow!("embedder returned no vector for the query"))
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vector>> {
        let expected = texts.len();
        let embedder = Arc::clone(&self.embedder);
        let vectors = run_blocking("embedding", Some(self.timeouts.embed), move || embedder.embed_batch(&texts)).await?;
        if vectors.len() != expected {
            bail!("embedder returned {} vectors for {expected} texts", vectors.len());
        }
        Ok(vectors)
    }
}

/// Runs `f` on the blocking pool, optionally bounded by `limit`.
///
/// A timed-out task is detached and keeps running, so only side-effect free
/// work (embedding, search, generation) goes through here.
async fn run_blocking<T, F>(what: &'static str, limit: Option<Duration>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    let joined = match limit {
        Some(limit) => with_timeout(what, limit, task).await?,
        None => task.await,
    };
    joined.with_context(|| format!("{what} task failed"))?
}

async fn with_timeout<F: Future>(what: &str, limit: Duration, fut: F) -> Result<F::Output> {
    tokio::time::timeout(limit, fut).await.map_err(|_| anyhow!("{what} timed out after {limit:?}"))
}
