//! Layered configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml`
//! and `APP_*` env vars (nested keys separated by `__`, e.g.
//! `APP_RETRIEVAL__MIN_RELEVANCE=0.2`). Path values expand `~` and `${VAR}`;
//! relative paths stay relative to the working directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub raw_txt_dir: String,
    pub index_path: String,
    pub meta_path: String,
    /// Upper bound on waiting for a persist before it is cancelled. Only
    /// honoured up to the commit point.
    pub persist_timeout_secs: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            raw_txt_dir: "data/raw".to_string(),
            index_path: "data/index/vectors.idx".to_string(),
            meta_path: "data/index/chunks.json".to_string(),
            persist_timeout_secs: 60,
        }
    }
}

impl DataSettings {
    pub fn raw_txt_dir(&self) -> PathBuf { expand_path(&self.raw_txt_dir) }
    pub fn index_path(&self) -> PathBuf { expand_path(&self.index_path) }
    pub fn meta_path(&self) -> PathBuf { expand_path(&self.meta_path) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { chunk_size: 800, overlap: 120 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub oversample: usize,
    pub min_relevance: f32,
    pub excerpt_chars: usize,
    pub fingerprint_prefix_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 5, oversample: 3, min_relevance: 0.10, excerpt_chars: 240, fingerprint_prefix_chars: 200 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model_dir: String,
    pub max_len: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { model_dir: "models/bge-m3".to_string(), max_len: 256, timeout_secs: 30 }
    }
}

impl EmbeddingSettings {
    pub fn model_dir(&self) -> PathBuf { expand_path(&self.model_dir) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    #[default]
    Ollama,
    OpenAi,
}

/// `url`/`model` address the local Ollama server. The OpenAI provider reads
/// its key from `OPENAI_API_KEY`, never from config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub provider: GenerationProvider,
    pub url: String,
    pub model: String,
    pub openai_url: String,
    pub openai_model: String,
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            provider: GenerationProvider::Ollama,
            url: "http://localhost:11434/api/generate".to_string(),
            model: "llama3.2:latest".to_string(),
            openai_url: "https://api.openai.com/v1/responses".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunking.chunk_size must be > 0".to_string()));
        }
        if c.overlap >= c.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                c.overlap, c.chunk_size
            )));
        }
        let r = &self.retrieval;
        if r.oversample == 0 {
            return Err(Error::InvalidConfig("retrieval.oversample must be >= 1".to_string()));
        }
        if !r.min_relevance.is_finite() {
            return Err(Error::InvalidConfig("retrieval.min_relevance must be finite".to_string()));
        }
        if r.excerpt_chars == 0 {
            return Err(Error::InvalidConfig("retrieval.excerpt_chars must be > 0".to_string()));
        }
        Ok(())
    }
}

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Ok(Self::load_for_env(&env_name))
    }

    pub fn load_for_env(env_name: &str) -> Self {
        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            other => tracing::debug!(env = other, "no env-specific config file for this environment"),
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Self { figment }
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    /// Extracts and validates the typed settings.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self.figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_documented_values() {
        let s = Config::from_figment(Figment::from(Serialized::defaults(Settings::default()))).settings().expect("settings");
        assert_eq!(s.retrieval.oversample, 3);
        assert!((s.retrieval.min_relevance - 0.10).abs() < f32::EPSILON);
        assert_eq!(s.retrieval.excerpt_chars, 240);
        assert_eq!(s.chunking.chunk_size, 800);
        assert_eq!(s.chunking.overlap, 120);
    }

    #[test]
    fn toml_and_env_layers_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[retrieval]\ntop_k = 7\nmin_relevance = 0.3\n")?;
            jail.create_file("config.test.toml", "[chunking]\nchunk_size = 400\noverlap = 40\n")?;
            jail.set_env("APP_RETRIEVAL__MIN_RELEVANCE", "0.25");
            let s = Config::load_for_env("test").settings().map_err(|e| e.to_string())?;
            assert_eq!(s.retrieval.top_k, 7);
            assert!((s.retrieval.min_relevance - 0.25).abs() < 1e-6);
            assert_eq!(s.chunking.chunk_size, 400);
            assert_eq!(s.retrieval.oversample, 3);
            Ok(())
        });
    }

    #[test]
    fn validation_rejects_bad_chunking_and_oversample() {
        let mut s = Settings::default();
        s.chunking.overlap = s.chunking.chunk_size;
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));

        let mut s = Settings::default();
        s.retrieval.oversample = 0;
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));

        let mut s = Settings::default();
        s.retrieval.min_relevance = f32::NAN;
        assert!(s.validate().is_err());
    }

    #[test]
    fn provider_and_persist_timeout_come_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_GENERATION__PROVIDER", "openai");
            jail.set_env("APP_GENERATION__OPENAI_MODEL", "gpt-4.1-mini");
            jail.set_env("APP_DATA__PERSIST_TIMEOUT_SECS", "5");
            let s = Config::load_for_env("test").settings().map_err(|e| e.to_string())?;
            assert_eq!(s.generation.provider, GenerationProvider::OpenAi);
            assert_eq!(s.generation.openai_model, "gpt-4.1-mini");
            assert_eq!(s.generation.model, "llama3.2:latest");
            assert_eq!(s.data.persist_timeout_secs, 5);
            Ok(())
        });
        assert_eq!(Settings::default().generation.provider, GenerationProvider::Ollama);
    }

    #[test]
    fn paths_expand_home_and_stay_relative() {
        Jail::expect_with(|jail| {
            jail.set_env("RAGDB_TEST_ROOT", "/srv/rag");
            let data = DataSettings { index_path: "${RAGDB_TEST_ROOT}/v.idx".to_string(), ..DataSettings::default() };
            assert_eq!(data.index_path(), PathBuf::from("/srv/rag/v.idx"));
            assert_eq!(data.meta_path(), PathBuf::from("data/index/chunks.json"));
            Ok(())
        });
    }
}
