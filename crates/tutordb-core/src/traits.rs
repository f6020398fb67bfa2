use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Chunk, Coordinate, EmbeddedChunk, GeneratedQuestion, Lane, RankedChunk, SourceDocument};

/// Which side of retrieval a text is embedded for. Providers that tune
/// document and query embeddings separately use this; others ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPurpose {
    Document,
    Query,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `hash:d768`).
    fn id(&self) -> &str;
    /// Output dimensionality; fixed for the lifetime of the embedder.
    fn dim(&self) -> usize;
    /// Longest input the provider accepts without truncation, in characters.
    fn max_len(&self) -> usize;
    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>>;
}

/// Turns raw uploaded bytes into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], title: &str) -> Result<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub documents_removed: usize,
    pub chunks_removed: usize,
    pub questions_removed: usize,
}

/// Persistent home of documents, chunks and generated questions.
///
/// Each coordinate has one live document and one live question set. Writers
/// stage rows under fresh ids and then flip the coordinate's live pointer, so
/// readers never observe a partially written set.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Vector dimensionality every stored embedding must match.
    fn dim(&self) -> usize;

    /// Store a document with all its chunks and make it live for its coordinate.
    async fn put(&self, document: &SourceDocument, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Replace the live question set for a coordinate.
    async fn put_questions(&self, coordinate: &Coordinate, questions: &[GeneratedQuestion]) -> Result<()>;

    /// `put` and `put_questions` committed together by a single pointer flip.
    async fn replace(
        &self,
        document: &SourceDocument,
        chunks: &[EmbeddedChunk],
        questions: &[GeneratedQuestion],
    ) -> Result<()>;

    /// Live chunks of `coordinate` admitted by `lane`, ranked by cosine
    /// similarity descending, ties by ascending ordinal. `top_k == 0` is an
    /// `InvalidArgument`; larger values are clamped to the store maximum.
    async fn query(&self, coordinate: &Coordinate, lane: Lane, vector: &[f32], top_k: usize) -> Result<Vec<RankedChunk>>;

    /// Live questions for `coordinate` in stored order, at most `limit`.
    async fn get_questions(&self, coordinate: &Coordinate, limit: usize) -> Result<Vec<GeneratedQuestion>>;

    async fn live_document(&self, coordinate: &Coordinate) -> Result<Option<SourceDocument>>;

    /// Chunks stored for a document in ordinal order, live or not.
    async fn document_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>>;

    /// Delete rows no live pointer reaches any more.
    async fn compact(&self) -> Result<CompactionReport>;
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for i in 0..len {
        dot += a[i] * b[i];
        na += a[i] * a[i];
        nb += b[i] * b[i];
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Sort by score descending, ordinal ascending, then truncate.
pub fn rank_and_truncate(hits: &mut Vec<RankedChunk>, top_k: usize) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.ordinal.cmp(&b.chunk.ordinal))
    });
    hits.truncate(top_k);
}
