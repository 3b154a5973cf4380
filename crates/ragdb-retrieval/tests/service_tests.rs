use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ragdb_core::traits::{AnswerGenerator, Embedder};
use ragdb_core::types::Context;
use ragdb_core::{Error, Record};
use ragdb_embed::FakeEmbedder;
use ragdb_retrieval::{NoEvidence, RagService, ServiceTimeouts, NO_EVIDENCE_ANSWER};
use ragdb_vector::{CorpusPaths, IndexedCorpus};
use tempfile::TempDir;

/// Maps known texts to fixed vectors so scores are exact.
struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    fn new(entries: &[(&str, [f32; 2])]) -> Self {
        Self { table: entries.iter().map(|(t, v)| ((*t).to_string(), v.to_vec())).collect() }
    }
}

impl Embedder for TableEmbedder {
    fn dim(&self) -> usize {
        2
    }
    fn max_len(&self) -> usize {
        usize::MAX
    }
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| self.table.get(t).cloned().ok_or_else(|| anyhow::anyhow!("unknown text {t:?}")))
            .collect()
    }
}

#[derive(Default)]
struct CountingGenerator {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl AnswerGenerator for CountingGenerator {
    fn generate(&self, question: &str, contexts: &[Context]) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        Ok(format!("{question} -> {}", contexts[0].text))
    }
}

fn open(dir: &TempDir) -> Arc<IndexedCorpus> {
    Arc::new(IndexedCorpus::open(CorpusPaths::in_dir(dir.path())).unwrap())
}

fn water_embedder() -> Arc<TableEmbedder> {
    Arc::new(TableEmbedder::new(&[
        ("Boil water for one minute.", [1.0, 0.0]),
        ("Store grain in sealed bins.", [0.0, 1.0]),
        ("how do I purify water", [0.9, 0.1]),
        ("what is the airspeed of a swallow", [0.05, 0.05]),
    ]))
}

#[tokio::test]
async fn ask_generates_with_citations() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(CountingGenerator::default());
    let service = RagService::new(open(&dir), water_embedder()).with_generator(generator.clone());
    let added = service
        .ingest(vec![
            Record::new("Boil water for one minute.").with_source("water.txt").with_page(1),
            Record::new("Store grain in sealed bins.").with_source("food.txt").with_page(2),
        ])
        .await
        .unwrap();
    assert_eq!(added, 2);

    let answer = service.ask("how do I purify water", 2).await.unwrap();
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(answer.answer, "how do I purify water -> Boil water for one minute.");
    assert_eq!(answer.no_evidence, None);
    assert_eq!(answer.citations[0].source, "water.txt");
    assert_eq!(answer.citations.len(), 2);
}

#[tokio::test]
async fn weak_evidence_skips_generator() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(CountingGenerator::default());
    let service = RagService::new(open(&dir), water_embedder()).with_generator(generator.clone());
    service
        .ingest(vec![Record::new("Boil water for one minute.").with_source("water.txt")])
        .await
        .unwrap();

    let answer = service.ask("what is the airspeed of a swallow", 3).await.unwrap();
    assert_eq!(answer.answer, NO_EVIDENCE_ANSWER);
    assert!(answer.citations.is_empty());
    assert!(matches!(answer.no_evidence, Some(NoEvidence::BelowThreshold { .. })));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_corpus_answers_without_generator() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(CountingGenerator::default());
    let service = RagService::new(open(&dir), water_embedder()).with_generator(generator.clone());
    let answer = service.ask("how do I purify water", 3).await.unwrap();
    assert_eq!(answer.answer, NO_EVIDENCE_ANSWER);
    assert_eq!(answer.no_evidence, Some(NoEvidence::NoHits));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blank_records_are_filtered_and_all_blank_is_rejected() {
    let dir = TempDir::new().unwrap();
    let service = RagService::new(open(&dir), water_embedder());
    let err = service.ingest(vec![Record::new("   "), Record::new("")]).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::EmptyBatch { .. })));

    let added = service
        .ingest(vec![Record::new(" \n"), Record::new("Boil water for one minute.")])
        .await
        .unwrap();
    assert_eq!(added, 1);
    assert_eq!(service.status().count, 1);
}

#[tokio::test]
async fn ingest_is_durable() {
    let dir = TempDir::new().unwrap();
    {
        let service = RagService::new(open(&dir), water_embedder());
        service.ingest(vec![Record::new("Boil water for one minute.")]).await.unwrap();
        service.ingest(vec![Record::new("Store grain in sealed bins.")]).await.unwrap();
    }
    let service = RagService::new(open(&dir), water_embedder());
    let status = service.status();
    assert_eq!(status.count, 2);
    assert_eq!(status.dim, Some(2));
    assert_eq!(status.generation, 2);
    let hits = service.search("how do I purify water", 1).await.unwrap();
    assert_eq!(hits[0].record.text, "Boil water for one minute.");
}

#[tokio::test]
async fn search_returns_raw_ranked_hits() {
    let dir = TempDir::new().unwrap();
    let service = RagService::new(open(&dir), water_embedder());
    let dup = Record::new("Boil water for one minute.").with_source("water.txt").with_page(1);
    service.ingest(vec![dup.clone(), dup, Record::new("Store grain in sealed bins.")]).await.unwrap();
    let hits = service.search("how do I purify water", 10).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].record, hits[1].record);
    assert!(hits[1].score >= hits[2].score);
}

#[tokio::test]
async fn ingest_path_chunks_text_files() {
    let dir = TempDir::new().unwrap();
    let docs = dir.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(docs.join("water.txt"), "Boil water   for one minute.\u{0C}Filter through cloth first.").unwrap();
    std::fs::write(docs.join("notes.md"), "ignored").unwrap();

    let service = RagService::new(open(&dir), Arc::new(FakeEmbedder::new(64)));
    let added = service.ingest_path(docs).await.unwrap();
    assert_eq!(added, 2);

    let hits = service.search("Filter through cloth first.", 1).await.unwrap();
    assert_eq!(hits[0].record.page, Some(2));
    assert_eq!(hits[0].record.source.as_deref(), Some("water.txt"));
}

#[tokio::test]
async fn slow_generator_times_out() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(CountingGenerator { calls: AtomicUsize::new(0), delay: Some(Duration::from_millis(500)) });
    let service = RagService::new(open(&dir), water_embedder())
        .with_generator(generator)
        .with_timeouts(ServiceTimeouts { generate: Duration::from_millis(20), ..ServiceTimeouts::default() });
    service.ingest(vec![Record::new("Boil water for one minute.")]).await.unwrap();
    let err = service.ask("how do I purify water", 1).await.unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
}

#[tokio::test]
async fn missing_generator_is_an_error_only_with_evidence() {
    let dir = TempDir::new().unwrap();
    let service = RagService::new(open(&dir), water_embedder());
    assert_eq!(service.ask("how do I purify water", 1).await.unwrap().answer, NO_EVIDENCE_ANSWER);
    service.ingest(vec![Record::new("Boil water for one minute.")]).await.unwrap();
    assert!(service.ask("how do I purify water", 1).await.is_err());
}

#[tokio::test]
async fn blank_query_is_rejected() {
    let dir = TempDir::new().unwrap();
    let service = RagService::new(open(&dir), water_embedder());
    assert!(service.search("  ", 3).await.is_err());
}

#[tokio::test]
async fn persist_timeout_never_reports_failure_for_committed_data() {
    let dir = TempDir::new().unwrap();
    let corpus = open(&dir);
    let service = RagService::new(Arc::clone(&corpus), Arc::new(FakeEmbedder::new(64)))
        .with_timeouts(ServiceTimeouts { persist: Duration::ZERO, ..ServiceTimeouts::default() });
    let records: Vec<Record> = (0..5_000).map(|i| Record::new(format!("note {i} about stored water"))).collect();

    let result = service.ingest(records).await;
    let expected = match &result {
        Ok(added) => *added,
        Err(e) => {
            assert!(e.to_string().contains("nothing was added"), "{e}");
            0
        }
    };
    assert_eq!(corpus.len(), expected);
    drop(service);
    drop(corpus);
    let reopened = IndexedCorpus::open(CorpusPaths::in_dir(dir.path())).unwrap();
    assert_eq!(reopened.len(), expected);
}

#[tokio::test]
async fn retry_after_persist_timeout_does_not_duplicate() {
    let dir = TempDir::new().unwrap();
    let corpus = open(&dir);
    let records: Vec<Record> = (0..2_000).map(|i| Record::new(format!("entry {i}"))).collect();

    let hasty = RagService::new(Arc::clone(&corpus), Arc::new(FakeEmbedder::new(32)))
        .with_timeouts(ServiceTimeouts { persist: Duration::ZERO, ..ServiceTimeouts::default() });
    if hasty.ingest(records.clone()).await.is_err() {
        let patient = RagService::new(Arc::clone(&corpus), Arc::new(FakeEmbedder::new(32)));
        patient.ingest(records).await.unwrap();
    }
    assert_eq!(corpus.len(), 2_000);
}
