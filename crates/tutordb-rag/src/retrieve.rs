use std::sync::Arc;
use tracing::{debug, info};

use tutordb_core::config::RetrievalSettings;
use tutordb_core::traits::{EmbedPurpose, Embedder, IndexStore};
use tutordb_core::types::{Coordinate, Lane, RankedChunk};
use tutordb_core::{Error, Result};

use crate::retry::RetryPolicy;

/// Embeds a student question and ranks the live chunks of one coordinate.
///
/// An empty result means the coordinate has nothing to answer from; callers
/// pass it to the synthesizer, which reports an ungrounded answer.
pub struct Retriever {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    default_top_k: usize,
    max_top_k: usize,
    max_question_chars: usize,
    store_retry: RetryPolicy,
}

impl Retriever {
    pub fn new(store: Arc<dyn IndexStore>, embedder: Arc<dyn Embedder>, settings: &RetrievalSettings) -> Result<Self> {
        if embedder.dim() != store.dim() {
            return Err(Error::DimensionMismatch { expected: store.dim(), actual: embedder.dim() });
        }
        Ok(Self {
            store,
            embedder,
            default_top_k: settings.default_top_k,
            max_top_k: settings.max_top_k,
            max_question_chars: settings.max_question_chars,
            store_retry: RetryPolicy::new(settings.store_max_attempts, 100),
        })
    }

    /// `None` selects the default; zero is rejected; larger values clamp.
    pub fn effective_top_k(&self, top_k: Option<usize>) -> Result<usize> {
        match top_k {
            None => Ok(self.default_top_k.min(self.max_top_k)),
            Some(0) => Err(Error::InvalidArgument("topK must be positive".to_string())),
            Some(k) => Ok(k.min(self.max_top_k)),
        }
    }

    pub fn check_question<'a>(&self, question: &'a str) -> Result<&'a str> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("question is required".to_string()));
        }
        if question.chars().count() > self.max_question_chars {
            return Err(Error::InvalidInput(format!(
                "question must be {} characters or less",
                self.max_question_chars
            )));
        }
        Ok(question)
    }

    pub async fn retrieve(
        &self,
        coordinate: &Coordinate,
        lane: Lane,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<RankedChunk>> {
        let question = self.check_question(question)?;
        let top_k = self.effective_top_k(top_k)?;

        let input: String = question.chars().take(self.embedder.max_len()).collect();
        let vector = self.embedder.embed(&input, EmbedPurpose::Query).await?;
        if vector.len() != self.store.dim() {
            return Err(Error::DimensionMismatch { expected: self.store.dim(), actual: vector.len() });
        }

        let hits = self
            .store_retry
            .run("store query", || self.store.query(coordinate, lane, &vector, top_k))
            .await?;
        if hits.is_empty() {
            debug!(coordinate = %coordinate, lane = lane.as_str(), "no content for coordinate");
        } else {
            info!(coordinate = %coordinate, lane = lane.as_str(), top_k, hits = hits.len(), "retrieved chunks");
        }
        Ok(hits)
    }
}
