//! ragdb-retrieval
//!
//! Turns a query vector into grounded contexts: `RetrievalPipeline` does the
//! oversample/dedup/gate pass over an `IndexedCorpus`, `build_prompt` and
//! the Ollama or OpenAI generator produce answers, and `RagService` wires it all behind an
//! async API.

pub mod generator;
pub mod pipeline;
pub mod prompt;
pub mod service;

pub use generator::{generator_from_settings, OllamaGenerator, OpenAiGenerator};
pub use pipeline::{fingerprint, Citation, NoEvidence, PipelineConfig, Retrieval, RetrievalPipeline};
pub use prompt::{build_prompt, NO_EVIDENCE_ANSWER};
pub use service::{Answer, RagService, ServiceStatus, ServiceTimeouts};
