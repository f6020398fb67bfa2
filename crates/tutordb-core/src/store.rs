//! In-process index store.
//!
//! Keeps every table behind one `RwLock`, so each write is atomic with
//! respect to readers. Serves as the static store for offline runs and as the
//! reference behaviour the Lance store is tested against.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::traits::{cosine_similarity, rank_and_truncate, CompactionReport, IndexStore};
use crate::types::{Chunk, Coordinate, EmbeddedChunk, GeneratedQuestion, Lane, RankedChunk, SourceDocument};

#[derive(Debug, Clone, Default)]
struct LivePointer {
    doc_id: Option<String>,
    question_set_id: Option<String>,
}

#[derive(Default)]
struct Tables {
    documents: HashMap<String, SourceDocument>,
    chunks: HashMap<String, Vec<EmbeddedChunk>>,
    question_sets: HashMap<String, Vec<GeneratedQuestion>>,
    live: HashMap<String, LivePointer>,
    next_set: u64,
}

impl Tables {
    fn stage_document(&mut self, document: &SourceDocument, chunks: &[EmbeddedChunk]) {
        let mut rows = chunks.to_vec();
        rows.sort_by_key(|c| c.chunk.ordinal);
        self.documents.insert(document.id.clone(), document.clone());
        self.chunks.insert(document.id.clone(), rows);
    }

    fn stage_questions(&mut self, questions: &[GeneratedQuestion]) -> String {
        self.next_set += 1;
        let set_id = format!("qs-{}", self.next_set);
        self.question_sets.insert(set_id.clone(), questions.to_vec());
        set_id
    }
}

pub struct MemoryIndexStore {
    dim: usize,
    max_top_k: usize,
    tables: RwLock<Tables>,
}

impl MemoryIndexStore {
    pub fn new(dim: usize, max_top_k: usize) -> Self {
        Self { dim, max_top_k, tables: RwLock::new(Tables::default()) }
    }

    fn check_chunks(&self, document: &SourceDocument, chunks: &[EmbeddedChunk]) -> Result<()> {
        validate_chunks(self.dim, document, chunks)
    }
}

/// Shared write-side validation: dimensionality and document/coordinate
/// ownership of every chunk.
pub fn validate_chunks(dim: usize, document: &SourceDocument, chunks: &[EmbeddedChunk]) -> Result<()> {
    for c in chunks {
        if c.embedding.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: c.embedding.len() });
        }
        if c.chunk.doc_id != document.id || c.chunk.coordinate != document.coordinate {
            return Err(Error::InvalidInput(format!(
                "chunk {} does not belong to document {}",
                c.chunk.id, document.id
            )));
        }
        if c.chunk.text.trim().is_empty() {
            return Err(Error::InvalidInput(format!("chunk {} is empty", c.chunk.id)));
        }
    }
    Ok(())
}

/// Shared read-side validation for `query`; returns the clamped `top_k`.
pub fn validate_query(dim: usize, max_top_k: usize, vector: &[f32], top_k: usize) -> Result<usize> {
    if top_k == 0 {
        return Err(Error::InvalidArgument("topK must be positive".to_string()));
    }
    if vector.len() != dim {
        return Err(Error::DimensionMismatch { expected: dim, actual: vector.len() });
    }
    Ok(top_k.min(max_top_k))
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn put(&self, document: &SourceDocument, chunks: &[EmbeddedChunk]) -> Result<()> {
        self.check_chunks(document, chunks)?;
        let mut tables = self.tables.write().await;
        tables.stage_document(document, chunks);
        tables.live.entry(document.coordinate.key()).or_default().doc_id = Some(document.id.clone());
        Ok(())
    }

    async fn put_questions(&self, coordinate: &Coordinate, questions: &[GeneratedQuestion]) -> Result<()> {
        let mut tables = self.tables.write().await;
        let set_id = tables.stage_questions(questions);
        tables.live.entry(coordinate.key()).or_default().question_set_id = Some(set_id);
        Ok(())
    }

    async fn replace(
        &self,
        document: &SourceDocument,
        chunks: &[EmbeddedChunk],
        questions: &[GeneratedQuestion],
    ) -> Result<()> {
        self.check_chunks(document, chunks)?;
        let mut tables = self.tables.write().await;
        tables.stage_document(document, chunks);
        let set_id = tables.stage_questions(questions);
        tables.live.insert(
            document.coordinate.key(),
            LivePointer { doc_id: Some(document.id.clone()), question_set_id: Some(set_id) },
        );
        Ok(())
    }

    async fn query(&self, coordinate: &Coordinate, lane: Lane, vector: &[f32], top_k: usize) -> Result<Vec<RankedChunk>> {
        let top_k = validate_query(self.dim, self.max_top_k, vector, top_k)?;
        let tables = self.tables.read().await;
        let Some(doc_id) = tables.live.get(&coordinate.key()).and_then(|p| p.doc_id.as_ref()) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<RankedChunk> = tables
            .chunks
            .get(doc_id)
            .map(|rows| {
                rows.iter()
                    .filter(|c| lane.admits(c.chunk.kind) && &c.chunk.coordinate == coordinate)
                    .map(|c| RankedChunk { chunk: c.chunk.clone(), score: cosine_similarity(vector, &c.embedding) })
                    .collect()
            })
            .unwrap_or_default();
        rank_and_truncate(&mut hits, top_k);
        Ok(hits)
    }

    async fn get_questions(&self, coordinate: &Coordinate, limit: usize) -> Result<Vec<GeneratedQuestion>> {
        let tables = self.tables.read().await;
        let questions = tables
            .live
            .get(&coordinate.key())
            .and_then(|p| p.question_set_id.as_ref())
            .and_then(|id| tables.question_sets.get(id))
            .map(|qs| qs.iter().take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(questions)
    }

    async fn live_document(&self, coordinate: &Coordinate) -> Result<Option<SourceDocument>> {
        let tables = self.tables.read().await;
        Ok(tables
            .live
            .get(&coordinate.key())
            .and_then(|p| p.doc_id.as_ref())
            .and_then(|id| tables.documents.get(id))
            .cloned())
    }

    async fn document_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>> {
        let tables = self.tables.read().await;
        Ok(tables
            .chunks
            .get(doc_id)
            .map(|rows| rows.iter().map(|c| c.chunk.clone()).collect())
            .unwrap_or_default())
    }

    async fn compact(&self) -> Result<CompactionReport> {
        let mut tables = self.tables.write().await;
        let live_docs: HashSet<String> = tables.live.values().filter_map(|p| p.doc_id.clone()).collect();
        let live_sets: HashSet<String> = tables.live.values().filter_map(|p| p.question_set_id.clone()).collect();

        let mut report = CompactionReport::default();
        let stale_docs: Vec<String> = tables.documents.keys().filter(|id| !live_docs.contains(*id)).cloned().collect();
        for id in stale_docs {
            tables.documents.remove(&id);
            report.documents_removed += 1;
            if let Some(rows) = tables.chunks.remove(&id) {
                report.chunks_removed += rows.len();
            }
        }
        let stale_sets: Vec<String> = tables.question_sets.keys().filter(|id| !live_sets.contains(*id)).cloned().collect();
        for id in stale_sets {
            if let Some(qs) = tables.question_sets.remove(&id) {
                report.questions_removed += qs.len();
            }
        }
        Ok(report)
    }
}
