//! Facade wiring store, embedder, extractor and the pipeline stages from
//! [`Settings`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use tutordb_core::chunker::{Chunker, ChunkingConfig};
use tutordb_core::config::{resolve_with_base, Settings};
use tutordb_core::store::MemoryIndexStore;
use tutordb_core::traits::{CompactionReport, Embedder, IndexStore, TextExtractor};
use tutordb_core::types::{Coordinate, SourceDocument};
use tutordb_core::{Error, Result};
use tutordb_embed::get_default_embedder;
use tutordb_vector::{CachedEmbedder, EmbeddingCache, LanceIndexStore};

use crate::api::{
    decode_document, limit_from, top_k_from, ErrorBody, IngestRequest, QueryRequest, QueryResponse, QuestionsRequest,
    QuestionsResponse,
};
use crate::cache::{CachedQuestionBank, CachedRetriever};
use crate::extract::AutoExtractor;
use crate::ingest::{IngestOptions, IngestReport, IngestionOrchestrator};
use crate::questions::{QuestionBank, QuestionGenerator};
use crate::retrieve::Retriever;
use crate::synthesize::AnswerSynthesizer;

pub struct RagService {
    store: Arc<dyn IndexStore>,
    orchestrator: IngestionOrchestrator,
    retriever: CachedRetriever,
    questions: CachedQuestionBank,
    synthesizer: AnswerSynthesizer,
    admin_token: Option<String>,
    max_bytes: usize,
    query_timeout: Duration,
    production: bool,
}

fn tokens_match(expected: &str, provided: &str) -> bool {
    let (a, b) = (expected.as_bytes(), provided.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl RagService {
    /// Assemble from explicit collaborators. The admin token is `None` until
    /// set with [`RagService::with_admin_token`], which rejects all ingestion.
    pub fn new(
        settings: &Settings,
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        let chunker = Chunker::new(ChunkingConfig {
            max_chars: settings.chunking.max_chunk_chars,
            overlap_chars: settings.chunking.overlap_chars,
        });
        let orchestrator = IngestionOrchestrator::new(
            store.clone(),
            embedder.clone(),
            extractor,
            chunker,
            QuestionGenerator::new(settings.questions.per_ingestion),
            IngestOptions::from_settings(settings),
        )?;
        let ttl = Duration::from_secs(settings.retrieval.cache_ttl_secs);
        let retriever = CachedRetriever::new(Retriever::new(store.clone(), embedder, &settings.retrieval)?, ttl);
        let questions = CachedQuestionBank::new(
            QuestionBank::new(store.clone(), settings.questions.default_limit, settings.questions.max_limit),
            ttl,
        );
        Ok(Self {
            store,
            orchestrator,
            retriever,
            questions,
            synthesizer: AnswerSynthesizer::default(),
            admin_token: None,
            max_bytes: settings.ingest.max_bytes,
            query_timeout: Duration::from_millis(settings.retrieval.query_timeout_ms),
            production: settings.ingest.production,
        })
    }

    /// Build everything from settings: the configured embedder and backend,
    /// the Lance embedding cache, and the admin token from the environment.
    pub async fn open(settings: &Settings, base_dir: &Path) -> Result<Self> {
        let mut embedder = get_default_embedder(&settings.embedding)?;
        if embedder.dim() != settings.embedding.dimension {
            return Err(Error::DimensionMismatch { expected: settings.embedding.dimension, actual: embedder.dim() });
        }
        let store: Arc<dyn IndexStore> = match settings.data.backend.as_str() {
            "memory" => Arc::new(MemoryIndexStore::new(embedder.dim(), settings.retrieval.max_top_k)),
            _ => {
                let dir = resolve_with_base(base_dir, &settings.data.lancedb_dir);
                std::fs::create_dir_all(&dir).map_err(Error::store)?;
                let uri = dir.to_string_lossy().to_string();
                let cache = EmbeddingCache::open(&uri, embedder.dim()).await?;
                embedder = Arc::new(CachedEmbedder::new(embedder, cache)?);
                Arc::new(
                    LanceIndexStore::open(&uri, embedder.dim(), settings.retrieval.max_top_k)
                        .await?
                        .with_compaction_grace(Duration::from_secs(settings.data.compaction_grace_secs)),
                )
            }
        };
        let admin_token = std::env::var(&settings.ingest.admin_token_env).ok().filter(|t| !t.is_empty());
        if admin_token.is_none() {
            warn!(var = %settings.ingest.admin_token_env, "admin token not set; ingestion disabled");
        }
        info!(backend = %settings.data.backend, embedder = embedder.id(), "rag service ready");
        Ok(Self::new(settings, store, embedder, Arc::new(AutoExtractor::default()))?.with_admin_token(admin_token))
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    fn authorize(&self, provided: Option<&str>) -> Result<()> {
        let Some(expected) = self.admin_token.as_deref() else {
            return Err(Error::Unauthorized("ingestion is disabled".to_string()));
        };
        match provided {
            Some(p) if tokens_match(expected, p) => Ok(()),
            _ => Err(Error::Unauthorized("invalid admin token".to_string())),
        }
    }

    /// Authorised ingestion of a base64 upload. The token is checked before
    /// anything is decoded.
    pub async fn ingest(&self, admin_token: Option<&str>, request: &IngestRequest) -> Result<IngestReport> {
        self.authorize(admin_token)?;
        let coordinate = request.coordinate()?;
        let bytes = decode_document(&request.pdf_base64, self.max_bytes)?;
        self.ingest_bytes(&coordinate, &request.title, &request.source_name, &bytes).await
    }

    /// Ingest already-decoded bytes; used by trusted local callers.
    pub async fn ingest_bytes(
        &self,
        coordinate: &Coordinate,
        title: &str,
        source_name: &str,
        bytes: &[u8],
    ) -> Result<IngestReport> {
        let report = self.orchestrator.ingest(coordinate, title, source_name, bytes).await?;
        let dropped = self.retriever.invalidate(coordinate).await + self.questions.invalidate(coordinate).await;
        if dropped > 0 {
            info!(coordinate = %coordinate, dropped, "invalidated cached reads");
        }
        Ok(report)
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let coordinate = request.coordinate()?;
        let top_k = top_k_from(request.top_k)?;
        let work = async {
            let hits = self.retriever.retrieve(&coordinate, request.lane, &request.question, top_k).await?;
            let answer = self.synthesizer.synthesize(&request.question, &hits);
            Ok::<_, Error>(QueryResponse { answer: answer.text, citations: answer.citations, grounded: answer.grounded })
        };
        tokio::time::timeout(self.query_timeout, work)
            .await
            .map_err(|_| Error::Timeout(self.query_timeout.as_millis() as u64))?
    }

    pub async fn questions(&self, request: &QuestionsRequest) -> Result<QuestionsResponse> {
        let coordinate = request.coordinate()?;
        let questions = self.questions.get_questions(&coordinate, limit_from(request.limit)).await?;
        Ok(QuestionsResponse { questions })
    }

    pub async fn compact(&self) -> Result<CompactionReport> {
        self.store.compact().await
    }

    pub async fn status(&self, coordinate: &Coordinate) -> Result<Option<SourceDocument>> {
        self.store.live_document(coordinate).await
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub fn error_body(&self, err: &Error) -> ErrorBody {
        ErrorBody::from_error(err, self.production)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cret", "s3cre"));
        assert!(!tokens_match("s3cret", "s3creT"));
    }
}
