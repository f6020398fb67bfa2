//! Domain types for curriculum ingestion and retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

pub type ChunkId = String;
pub type DocumentId = String;

pub const MAX_COORDINATE_FIELD_CHARS: usize = 120;

/// Addresses one subtopic: `(subject, chapter, topic, subtopic)`.
///
/// Construct through [`Coordinate::new`]; every field is trimmed and must be
/// non-empty and at most [`MAX_COORDINATE_FIELD_CHARS`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    pub subject: String,
    pub chapter_id: String,
    pub topic_id: String,
    pub subtopic_id: String,
}

impl Coordinate {
    pub fn new(subject: &str, chapter_id: &str, topic_id: &str, subtopic_id: &str) -> Result<Self> {
        Ok(Self {
            subject: validate_field("subject", subject)?,
            chapter_id: validate_field("chapterId", chapter_id)?,
            topic_id: validate_field("topicId", topic_id)?,
            subtopic_id: validate_field("subtopicId", subtopic_id)?,
        })
    }

    /// Stable key used for live pointers, locks and cache entries.
    pub fn key(&self) -> String {
        format!("{}__{}__{}__{}", self.subject, self.chapter_id, self.topic_id, self.subtopic_id)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.subject, self.chapter_id, self.topic_id, self.subtopic_id)
    }
}

fn validate_field(name: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("{name} is required")));
    }
    if trimmed.chars().count() > MAX_COORDINATE_FIELD_CHARS {
        return Err(Error::InvalidInput(format!(
            "{name} must be {MAX_COORDINATE_FIELD_CHARS} characters or less"
        )));
    }
    Ok(trimmed.to_string())
}

/// Content class of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    #[serde(alias = "facts")]
    Fact,
    #[serde(alias = "activities")]
    Activity,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Fact => "fact",
            ChunkKind::Activity => "activity",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fact" | "facts" => Some(ChunkKind::Fact),
            "activity" | "activities" => Some(ChunkKind::Activity),
            _ => None,
        }
    }
}

/// Retrieval partition. Part of the filter predicate, never a ranking signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    #[serde(alias = "facts")]
    Fact,
    #[serde(alias = "activities")]
    Activity,
    #[default]
    Both,
}

impl Lane {
    pub fn admits(self, kind: ChunkKind) -> bool {
        match self {
            Lane::Fact => kind == ChunkKind::Fact,
            Lane::Activity => kind == ChunkKind::Activity,
            Lane::Both => true,
        }
    }

    /// The single kind this lane is restricted to, if any.
    pub fn kind(self) -> Option<ChunkKind> {
        match self {
            Lane::Fact => Some(ChunkKind::Fact),
            Lane::Activity => Some(ChunkKind::Activity),
            Lane::Both => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Fact => "fact",
            Lane::Activity => "activity",
            Lane::Both => "both",
        }
    }
}

impl std::str::FromStr for Lane {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fact" | "facts" => Ok(Lane::Fact),
            "activity" | "activities" => Ok(Lane::Activity),
            "both" | "" => Ok(Lane::Both),
            other => Err(Error::InvalidInput(format!("unknown lane '{other}'"))),
        }
    }
}

/// One ingested source file. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: DocumentId,
    pub coordinate: Coordinate,
    pub title: String,
    pub source_name: String,
    pub byte_size: usize,
    pub text_chars: usize,
    pub ingested_at: DateTime<Utc>,
    pub fact_chunk_count: usize,
    pub activity_chunk_count: usize,
    pub question_count: usize,
}

/// Chunker output: ordered, labelled, not yet addressable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub kind: ChunkKind,
    pub heading: String,
    pub text: String,
    pub ordinal: usize,
}

/// A stored unit of text. `id` is `<doc_id>:<ordinal>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_id: DocumentId,
    pub coordinate: Coordinate,
    pub kind: ChunkKind,
    pub heading: String,
    pub text: String,
    pub ordinal: usize,
}

impl Chunk {
    pub fn from_draft(draft: ChunkDraft, doc_id: &str, coordinate: &Coordinate) -> Self {
        Self {
            id: format!("{}:{}", doc_id, draft.ordinal),
            doc_id: doc_id.to_string(),
            coordinate: coordinate.clone(),
            kind: draft.kind,
            heading: draft.heading,
            text: draft.text,
            ordinal: draft.ordinal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Store query result. Higher `score` is more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Mcq,
    Short,
    /// Asks for the cause behind a stated effect.
    Reasoning,
}

impl QuestionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::Mcq => "mcq",
            QuestionKind::Short => "short",
            QuestionKind::Reasoning => "reasoning",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mcq" => Some(QuestionKind::Mcq),
            "short" => Some(QuestionKind::Short),
            "reasoning" => Some(QuestionKind::Reasoning),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    /// Option label for MCQs, the expected answer text otherwise.
    pub correct: String,
    pub explanation: String,
}

/// Practice question derived from fact chunks at ingestion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuestion {
    pub id: String,
    pub doc_id: DocumentId,
    pub coordinate: Coordinate,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<QuestionOption>,
    pub answer: QuestionAnswer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub source_chunk_ids: Vec<ChunkId>,
}

impl GeneratedQuestion {
    /// Option texts other than the correct one.
    pub fn distractors(&self) -> Vec<&str> {
        self.options
            .iter()
            .filter(|o| o.label != self.answer.correct)
            .map(|o| o.text.as_str())
            .collect()
    }
}

/// Reference from an answer back to the chunk it drew from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub chunk_id: ChunkId,
    pub kind: ChunkKind,
    pub heading: String,
    pub score: f32,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    /// False when no chunks were available, or none of them spoke to the
    /// question.
    pub grounded: bool,
}
