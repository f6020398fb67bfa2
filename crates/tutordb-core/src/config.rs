//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`APP_RETRIEVAL__MAX_TOP_K=8` sets `retrieval.max_top_k`). [`Settings`]
//! is the typed view with every field defaulted, so an empty environment
//! still yields a working configuration.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub struct Config {
    figment: Figment,
    env_name: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment, env_name };
        config.validate_for_env()?;
        Ok(config)
    }

    /// Build from an explicit figment; used by tests and embedding callers.
    pub fn from_figment(figment: Figment, env_name: &str) -> Self {
        Self { figment, env_name: env_name.to_string() }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read settings: {}", e))?;
        if matches!(self.env_name.as_str(), "prod" | "production") {
            settings.ingest.production = true;
        }
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self) -> anyhow::Result<()> {
        match self.env_name.as_str() {
            "prod" | "production" => {
                let provider: String = self.get("embedding.provider").unwrap_or_default();
                if provider == "hash" {
                    anyhow::bail!("hash embeddings are not allowed in production");
                }
            }
            "dev" | "development" | "test" | "testing" => {}
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub questions: QuestionSettings,
    pub ingest: IngestSettings,
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.data.backend.as_str(), "lance" | "memory") {
            anyhow::bail!("data.backend must be 'lance' or 'memory', got '{}'", self.data.backend);
        }
        if self.embedding.dimension == 0 {
            anyhow::bail!("embedding.dimension must be positive");
        }
        if self.embedding.concurrency == 0 {
            anyhow::bail!("embedding.concurrency must be positive");
        }
        if self.chunking.max_chunk_chars < 16 {
            anyhow::bail!("chunking.max_chunk_chars must be at least 16");
        }
        if self.chunking.overlap_chars.saturating_mul(2) > self.chunking.max_chunk_chars {
            anyhow::bail!("chunking.overlap_chars must be at most half of chunking.max_chunk_chars");
        }
        if self.retrieval.max_top_k == 0 || self.retrieval.default_top_k == 0 {
            anyhow::bail!("retrieval top_k bounds must be positive");
        }
        if self.retrieval.default_top_k > self.retrieval.max_top_k {
            anyhow::bail!("retrieval.default_top_k exceeds retrieval.max_top_k");
        }
        if self.questions.max_limit == 0 {
            anyhow::bail!("questions.max_limit must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// `lance` (persistent) or `memory` (process-local, for offline runs).
    pub backend: String,
    pub lancedb_dir: String,
    /// Unreachable rows younger than this survive `compact`, so a concurrent
    /// ingestion's staged rows are never reclaimed before its pointer flip.
    pub compaction_grace_secs: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            backend: "lance".to_string(),
            lancedb_dir: "./dev_data/lancedb".to_string(),
            compaction_grace_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `hash`, `local` or `gemini`.
    pub provider: String,
    pub dimension: usize,
    pub model: String,
    pub api_base: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            dimension: 768,
            model: "text-embedding-004".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_ms: 15_000,
            concurrency: 4,
            max_attempts: 3,
            backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { max_chunk_chars: 1100, overlap_chars: 160 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub max_question_chars: usize,
    pub query_timeout_ms: u64,
    /// Read cache lifetime; 0 disables the cache.
    pub cache_ttl_secs: u64,
    pub store_max_attempts: u32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 10,
            max_question_chars: 500,
            query_timeout_ms: 20_000,
            cache_ttl_secs: 300,
            store_max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestionSettings {
    pub per_ingestion: usize,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for QuestionSettings {
    fn default() -> Self {
        Self { per_ingestion: 10, default_limit: 10, max_limit: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub max_bytes: usize,
    pub max_title_chars: usize,
    pub admin_token_env: String,
    pub extract_max_attempts: u32,
    pub store_max_attempts: u32,
    pub backoff_ms: u64,
    /// Redact error details in caller-facing responses.
    pub production: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_bytes: 25 * 1024 * 1024,
            max_title_chars: 180,
            admin_token_env: "RAG_INGEST_ADMIN_TOKEN".to_string(),
            extract_max_attempts: 2,
            store_max_attempts: 3,
            backoff_ms: 250,
            production: false,
        }
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

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
