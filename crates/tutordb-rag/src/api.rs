//! Caller-facing request and response shapes (camelCase JSON).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use tutordb_core::types::{Citation, Coordinate, GeneratedQuestion, Lane};
use tutordb_core::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub subject: String,
    pub chapter_id: String,
    pub topic_id: String,
    pub subtopic_id: String,
    pub title: String,
    #[serde(default)]
    pub source_name: String,
    pub pdf_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub subject: String,
    pub chapter_id: String,
    pub topic_id: String,
    pub subtopic_id: String,
    pub question: String,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub lane: Lane,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub grounded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionsRequest {
    pub subject: String,
    pub chapter_id: String,
    pub topic_id: String,
    pub subtopic_id: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionsResponse {
    pub questions: Vec<GeneratedQuestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    /// Details carry the underlying cause and are dropped in production.
    pub fn from_error(err: &Error, production: bool) -> Self {
        let code = err.kind();
        let error = match code {
            ErrorKind::InvalidInput => "Invalid request",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::ExtractionFailed => "Could not read the document",
            ErrorKind::EmbeddingUnavailable => "Embedding service unavailable",
            ErrorKind::DimensionMismatch => "Index and embedder are out of sync",
            ErrorKind::StoreUnavailable => "Index store unavailable",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::Internal => "Internal error",
        };
        Self { error: error.to_string(), code, details: (!production).then(|| err.to_string()) }
    }
}

macro_rules! coordinate_of {
    ($t:ty) => {
        impl $t {
            pub fn coordinate(&self) -> Result<Coordinate> {
                Coordinate::new(&self.subject, &self.chapter_id, &self.topic_id, &self.subtopic_id)
            }
        }
    };
}

coordinate_of!(IngestRequest);
coordinate_of!(QueryRequest);
coordinate_of!(QuestionsRequest);

fn strip_data_url(encoded: &str) -> &str {
    let trimmed = encoded.trim();
    if trimmed.starts_with("data:") {
        if let Some(idx) = trimmed.find(";base64,") {
            return &trimmed[idx + ";base64,".len()..];
        }
    }
    trimmed
}

/// Slack over the exact base64 length for a data-URL prefix and MIME line
/// breaks (two bytes per 76 characters).
fn raw_upload_limit(max_encoded: usize) -> usize {
    max_encoded.saturating_add(max_encoded / 32).saturating_add(1024)
}

/// Decode an upload, rejecting oversized payloads before decoding. The raw
/// string is bounded before anything is copied.
pub fn decode_document(encoded: &str, max_bytes: usize) -> Result<Vec<u8>> {
    let max_encoded = max_bytes.div_ceil(3).saturating_mul(4);
    if encoded.len() > raw_upload_limit(max_encoded) {
        return Err(Error::InvalidInput(format!("document exceeds the {max_bytes} byte limit")));
    }
    let payload: String = strip_data_url(encoded).chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if payload.len() > max_encoded {
        return Err(Error::InvalidInput(format!("document exceeds the {max_bytes} byte limit")));
    }
    let bytes = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| Error::InvalidInput(format!("document is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(Error::InvalidInput("document is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(Error::InvalidInput(format!("document exceeds the {max_bytes} byte limit")));
    }
    Ok(bytes)
}

/// Signed caller value to a retriever `top_k`; non-positive is rejected.
pub fn top_k_from(value: Option<i64>) -> Result<Option<usize>> {
    match value {
        None => Ok(None),
        Some(k) if k <= 0 => Err(Error::InvalidArgument("topK must be positive".to_string())),
        Some(k) => Ok(Some(usize::try_from(k).unwrap_or(usize::MAX))),
    }
}

/// Signed caller value to a question limit; clamps below at 1.
pub fn limit_from(value: Option<i64>) -> Option<usize> {
    value.map(|l| usize::try_from(l.max(1)).unwrap_or(usize::MAX))
}
