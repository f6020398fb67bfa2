//! Hosted embedding provider speaking the Generative Language
//! `models/{model}:embedContent` API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use tutordb_core::config::EmbeddingSettings;
use tutordb_core::traits::{EmbedPurpose, Embedder};
use tutordb_core::{Error, Result};

/// Inputs longer than this are truncated by the service.
const MAX_INPUT_CHARS: usize = 8_000;

pub struct GeminiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dim: usize,
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'static str,
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: Option<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

impl GeminiEmbedder {
    /// Build from settings, reading the API key from `settings.api_key_env`.
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfig(format!("{} is not set", settings.api_key_env)))?;
        Self::new(settings, api_key)
    }

    pub fn new(settings: &EmbeddingSettings, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let base = settings.api_base.trim_end_matches('/');
        Ok(Self {
            client,
            endpoint: format!("{}/models/{}:embedContent", base, settings.model),
            model: settings.model.clone(),
            api_key,
            dim: settings.dimension,
            id: format!("gemini:{}:d{}", settings.model, settings.dimension),
        })
    }
}

fn task_type(purpose: EmbedPurpose) -> &'static str {
    match purpose {
        EmbedPurpose::Document => "RETRIEVAL_DOCUMENT",
        EmbedPurpose::Query => "RETRIEVAL_QUERY",
    }
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        MAX_INPUT_CHARS
    }

    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>> {
        let body = EmbedContentRequest {
            model: format!("models/{}", self.model),
            content: Content { parts: [Part { text }] },
            task_type: task_type(purpose),
            output_dimensionality: self.dim,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Error::embedding)?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(Error::InvalidConfig(format!("embedding API rejected credentials ({status})")));
        }
        if !status.is_success() {
            return Err(Error::EmbeddingUnavailable(format!("embedding API returned status {status}")));
        }

        let parsed: EmbedContentResponse = response.json().await.map_err(Error::embedding)?;
        let mut values = parsed
            .embedding
            .map(|e| e.values)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::EmbeddingUnavailable("response carried no embedding".to_string()))?;
        if values.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: values.len() });
        }
        l2_normalize(&mut values);
        debug!(model = %self.model, ?purpose, "embedded text remotely");
        Ok(values)
    }
}
