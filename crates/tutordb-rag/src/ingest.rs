//! Ingestion orchestrator: extract, chunk, embed, generate questions, then
//! commit everything with one store `replace`. Any failure before the commit
//! leaves the coordinate's live data untouched.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use tutordb_core::chunker::Chunker;
use tutordb_core::config::Settings;
use tutordb_core::traits::{EmbedPurpose, Embedder, IndexStore, TextExtractor};
use tutordb_core::types::{Chunk, ChunkKind, Coordinate, EmbeddedChunk, SourceDocument};
use tutordb_core::{Error, Result};

use crate::questions::QuestionGenerator;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub doc_id: String,
    pub fact_chunk_count: usize,
    pub activity_chunk_count: usize,
    pub question_count: usize,
    pub text_chars: usize,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub max_bytes: usize,
    pub max_title_chars: usize,
    pub embed_concurrency: usize,
    pub embed_timeout: Duration,
    pub embed_retry: RetryPolicy,
    pub extract_retry: RetryPolicy,
    pub store_retry: RetryPolicy,
}

impl IngestOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let e = &settings.embedding;
        let i = &settings.ingest;
        Self {
            max_bytes: i.max_bytes,
            max_title_chars: i.max_title_chars,
            embed_concurrency: e.concurrency.max(1),
            embed_timeout: Duration::from_millis(e.timeout_ms),
            embed_retry: RetryPolicy::new(e.max_attempts, e.backoff_ms),
            extract_retry: RetryPolicy::new(i.extract_max_attempts, i.backoff_ms),
            store_retry: RetryPolicy::new(i.store_max_attempts, i.backoff_ms),
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

pub struct IngestionOrchestrator {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn TextExtractor>,
    chunker: Chunker,
    generator: QuestionGenerator,
    options: IngestOptions,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// `doc_` + 16 hex chars of BLAKE3 over coordinate, bytes and time.
pub fn document_id(coordinate: &Coordinate, bytes: &[u8], at: DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(coordinate.key().as_bytes());
    hasher.update(bytes);
    hasher.update(&at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    format!("doc_{}", &hasher.finalize().to_hex()[..16])
}

impl IngestionOrchestrator {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn TextExtractor>,
        chunker: Chunker,
        generator: QuestionGenerator,
        options: IngestOptions,
    ) -> Result<Self> {
        if embedder.dim() != store.dim() {
            return Err(Error::DimensionMismatch { expected: store.dim(), actual: embedder.dim() });
        }
        Ok(Self { store, embedder, extractor, chunker, generator, options, locks: Mutex::new(HashMap::new()) })
    }

    async fn coordinate_lock(&self, coordinate: &Coordinate) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(coordinate.key()).or_default().clone()
    }

    /// Give back a handle from `coordinate_lock`, dropping the map entry once
    /// no other ingestion holds or waits on it. Handles are only cloned
    /// under the map lock, so the count cannot grow while it is checked.
    async fn release_lock(&self, coordinate: &Coordinate, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        let key = coordinate.key();
        if locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&key);
        }
    }

    fn check_request(&self, title: &str, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("document is empty".to_string()));
        }
        if bytes.len() > self.options.max_bytes {
            return Err(Error::InvalidInput(format!(
                "document is {} bytes; the limit is {}",
                bytes.len(),
                self.options.max_bytes
            )));
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("title is required".to_string()));
        }
        if title.chars().count() > self.options.max_title_chars {
            return Err(Error::InvalidInput(format!(
                "title must be {} characters or less",
                self.options.max_title_chars
            )));
        }
        Ok(())
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let input: String = text.chars().take(self.embedder.max_len()).collect();
        let timeout_ms = self.options.embed_timeout.as_millis() as u64;
        let vector = self
            .options
            .embed_retry
            .run("embed", || async {
                tokio::time::timeout(self.options.embed_timeout, self.embedder.embed(&input, EmbedPurpose::Document))
                    .await
                    .map_err(|_| Error::Timeout(timeout_ms))?
            })
            .await?;
        if vector.len() != self.store.dim() {
            return Err(Error::DimensionMismatch { expected: self.store.dim(), actual: vector.len() });
        }
        Ok(vector)
    }

    /// Embed chunks with bounded concurrency, preserving order. The first
    /// exhausted chunk fails the whole batch.
    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>> {
        stream::iter(chunks.into_iter().map(|chunk| async move {
            let embedding = self.embed_one(&chunk.text).await?;
            Ok::<_, Error>(EmbeddedChunk { chunk, embedding })
        }))
        .buffered(self.options.embed_concurrency)
        .try_collect()
        .await
    }

    pub async fn ingest(
        &self,
        coordinate: &Coordinate,
        title: &str,
        source_name: &str,
        bytes: &[u8],
    ) -> Result<IngestReport> {
        self.check_request(title, bytes)?;
        let title = title.trim();
        let source_name = match source_name.trim() {
            "" => title,
            s => s,
        };

        let lock = self.coordinate_lock(coordinate).await;
        let result = {
            let _guard = lock.lock().await;
            self.ingest_locked(coordinate, title, source_name, bytes).await
        };
        self.release_lock(coordinate, lock).await;
        result
    }

    async fn ingest_locked(
        &self,
        coordinate: &Coordinate,
        title: &str,
        source_name: &str,
        bytes: &[u8],
    ) -> Result<IngestReport> {
        info!(coordinate = %coordinate, title, bytes = bytes.len(), "ingestion started");

        let text = self.options.extract_retry.run("extract", || self.extractor.extract(bytes, title)).await?;
        let drafts = self.chunker.chunk(&text)?;

        let ingested_at = Utc::now();
        let doc_id = document_id(coordinate, bytes, ingested_at);
        let chunks: Vec<Chunk> = drafts.into_iter().map(|d| Chunk::from_draft(d, &doc_id, coordinate)).collect();
        let fact_chunk_count = chunks.iter().filter(|c| c.kind == ChunkKind::Fact).count();
        let activity_chunk_count = chunks.len() - fact_chunk_count;
        let questions = self.generator.generate(&doc_id, coordinate, &chunks);
        debug!(doc_id = %doc_id, chunks = chunks.len(), questions = questions.len(), "chunked document");

        let embedded = self.embed_chunks(chunks).await?;

        let text_chars = text.chars().count();
        let document = SourceDocument {
            id: doc_id.clone(),
            coordinate: coordinate.clone(),
            title: title.to_string(),
            source_name: source_name.to_string(),
            byte_size: bytes.len(),
            text_chars,
            ingested_at,
            fact_chunk_count,
            activity_chunk_count,
            question_count: questions.len(),
        };
        self.options
            .store_retry
            .run("store replace", || self.store.replace(&document, &embedded, &questions))
            .await?;

        info!(
            coordinate = %coordinate,
            doc_id = %doc_id,
            facts = fact_chunk_count,
            activities = activity_chunk_count,
            questions = questions.len(),
            "ingestion committed"
        );
        Ok(IngestReport { doc_id, fact_chunk_count, activity_chunk_count, question_count: questions.len(), text_chars })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutordb_core::store::MemoryIndexStore;
    use tutordb_embed::HashEmbedder;

    use crate::extract::PlainTextExtractor;

    fn orchestrator() -> Arc<IngestionOrchestrator> {
        let mut options = IngestOptions::default();
        options.embed_retry = RetryPolicy::none();
        Arc::new(
            IngestionOrchestrator::new(
                Arc::new(MemoryIndexStore::new(32, 10)),
                Arc::new(HashEmbedder::new(32)),
                Arc::new(PlainTextExtractor),
                Chunker::default(),
                QuestionGenerator::new(5),
                options,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn coordinate_locks_are_dropped_after_ingestion() {
        let orch = orchestrator();
        let body = b"# Cells\n\nA cell is a source of electric energy for a circuit.\n";
        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let orch = orch.clone();
                tokio::spawn(async move {
                    let c = Coordinate::new("Science", "electricity", "cells", &format!("part-{}", i % 3)).unwrap();
                    orch.ingest(&c, "Cells", "cells.md", body).await
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        let failed = Coordinate::new("Science", "electricity", "cells", "empty").unwrap();
        assert!(orch.ingest(&failed, "Cells", "cells.md", b"   ").await.is_err());
        assert!(orch.locks.lock().await.is_empty());
    }

    #[test]
    fn document_ids_depend_on_time() {
        let c = Coordinate::new("Science", "electricity", "cells", "intro").unwrap();
        let now = Utc::now();
        let a = document_id(&c, b"same", now);
        assert_eq!(a, document_id(&c, b"same", now));
        assert_ne!(a, document_id(&c, b"same", now + chrono::Duration::milliseconds(1)));
        assert!(a.starts_with("doc_") && a.len() == 20);
    }
}
