//! Answer generation over HTTP: a local Ollama server by default, or the
//! OpenAI Responses API when `generation.provider = "openai"`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use serde::{Deserialize, Serialize};

use ragdb_core::config::{GenerationProvider, GenerationSettings};
use ragdb_core::traits::AnswerGenerator;
use ragdb_core::types::Context;

use crate::prompt::build_prompt;

const OPENAI_TEMPERATURE: f32 = 0.2;

/// Builds the generator selected by `settings.provider`. Construct and drop
/// the result outside of an async context; the service calls it from a
/// blocking worker.
pub fn generator_from_settings(settings: &GenerationSettings) -> Result<Arc<dyn AnswerGenerator>> {
    Ok(match settings.provider {
        GenerationProvider::Ollama => Arc::new(OllamaGenerator::new(settings)?),
        GenerationProvider::OpenAi => Arc::new(OpenAiGenerator::from_env(settings)?),
    })
}

fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("building HTTP client")
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

/// Blocking client for Ollama's `POST /api/generate`.
pub struct OllamaGenerator {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(settings: &GenerationSettings) -> Result<Self> {
        Ok(Self { client: http_client(settings.timeout_secs)?, url: settings.url.clone(), model: settings.model.clone() })
    }
}

impl AnswerGenerator for OllamaGenerator {
    fn generate(&self, question: &str, contexts: &[Context]) -> Result<String> {
        let prompt = build_prompt(question, contexts);
        tracing::debug!(model = %self.model, url = %self.url, contexts = contexts.len(), "calling ollama");
        let body: OllamaResponse = self
            .client
            .post(&self.url)
            .json(&OllamaRequest { model: &self.model, prompt: &prompt, stream: false })
            .send()
            .with_context(|| format!("POST {}", self.url))?
            .error_for_status()
            .with_context(|| format!("generator at {} returned an error status", self.url))?
            .json()
            .context("decoding ollama response")?;
        Ok(body.response.trim().to_string())
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a str,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    output: Vec<OpenAiOutputItem>,
}

#[derive(Deserialize)]
struct OpenAiOutputItem {
    #[serde(default)]
    content: Vec<OpenAiContent>,
}

#[derive(Deserialize)]
struct OpenAiContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl OpenAiResponse {
    /// Concatenated `output_text` parts, trimmed.
    fn output_text(&self) -> String {
        let text: String = self
            .output
            .iter()
            .flat_map(|item| &item.content)
            .filter(|c| c.kind == "output_text")
            .map(|c| c.text.as_str())
            .collect();
        text.trim().to_string()
    }
}

/// Blocking client for OpenAI's `POST /v1/responses`.
pub struct OpenAiGenerator {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: String,
}

impl OpenAiGenerator {
    /// Reads the key from `OPENAI_API_KEY`.
    pub fn from_env(settings: &GenerationSettings) -> Result<Self> {
        Self::new(settings, std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn new(settings: &GenerationSettings, api_key: Option<String>) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("generation.provider is openai but OPENAI_API_KEY is not set"))?;
        Ok(Self {
            client: http_client(settings.timeout_secs)?,
            url: settings.openai_url.clone(),
            model: settings.openai_model.clone(),
            api_key,
        })
    }
}

impl AnswerGenerator for OpenAiGenerator {
    fn generate(&self, question: &str, contexts: &[Context]) -> Result<String> {
        let prompt = build_prompt(question, contexts);
        tracing::debug!(model = %self.model, contexts = contexts.len(), "calling openai");
        let body: OpenAiResponse = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&OpenAiRequest { model: &self.model, input: &prompt, temperature: OPENAI_TEMPERATURE })
            .send()
            .with_context(|| format!("POST {}", self.url))?
            .error_for_status()
            .with_context(|| format!("generator at {} returned an error status", self.url))?
            .json()
            .context("decoding openai response")?;
        Ok(body.output_text())
    }
}
