//! Lance-backed embedding cache keyed by `(content_hash, embedder_id)`.
//!
//! The cache is consulted prior to calling a provider and written through on
//! cache misses, so re-ingesting unchanged text costs no provider calls.

use arrow_array::{FixedSizeListArray, RecordBatch, StringArray, TimestampMillisecondArray};
use async_trait::async_trait;
use chrono::Utc;
use lancedb::Table;
use std::sync::Arc;
use tracing::{debug, warn};

use tutordb_core::traits::{EmbedPurpose, Embedder};
use tutordb_core::{Error, Result};

use crate::schema::{build_cache_schema, vector_dim, EMBED_CACHE_TABLE};
use crate::table::{append, ensure_table, open_db, quote, scan, strings, vector_at, vectors};

pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub struct EmbeddingCache {
    table: Table,
    dim: usize,
}

impl EmbeddingCache {
    pub async fn open(uri: &str, dim: usize) -> Result<Self> {
        let width = i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("dimension {dim} too large")))?;
        let conn = open_db(uri).await?;
        let table = ensure_table(&conn, EMBED_CACHE_TABLE, build_cache_schema(width)).await?;
        let schema = table.schema().await.map_err(Error::store)?;
        if let Some(actual) = vector_dim(&schema) {
            if actual != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual });
            }
        }
        Ok(Self { table, dim })
    }

    pub async fn get(&self, embedder_id: &str, hash: &str) -> Result<Option<Vec<f32>>> {
        let filter = format!("content_hash = {} AND embedder_id = {}", quote(hash), quote(embedder_id));
        for batch in scan(&self.table, Some(filter)).await? {
            if batch.num_rows() == 0 {
                continue;
            }
            let v = vector_at(vectors(&batch, "vector")?, 0);
            if v.len() == self.dim {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    pub async fn put(&self, embedder_id: &str, hash: &str, vector: &[f32]) -> Result<()> {
        let width = i32::try_from(self.dim).unwrap_or(i32::MAX);
        let batch = RecordBatch::try_new(
            build_cache_schema(width),
            vec![
                Arc::new(StringArray::from(vec![hash.to_string()])),
                Arc::new(StringArray::from(vec![embedder_id.to_string()])),
                Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                    std::iter::once(Some(vector.iter().map(|&x| Some(x)).collect::<Vec<_>>())),
                    width,
                )),
            ],
        )
        .map_err(Error::store)?;
        append(&self.table, batch).await
    }

    pub async fn entry_count(&self) -> Result<usize> {
        self.table.count_rows(None).await.map_err(Error::store)
    }

    /// Distinct embedder ids present in the cache.
    pub async fn embedder_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for batch in scan(&self.table, None).await? {
            let col = strings(&batch, "embedder_id")?;
            for i in 0..batch.num_rows() {
                let id = col.value(i);
                if !ids.iter().any(|x: &String| x == id) {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }
}

/// Write-through decorator around any [`Embedder`]. Only document
/// embeddings are cached; query embeddings always hit the provider.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: EmbeddingCache,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: EmbeddingCache) -> Result<Self> {
        if inner.dim() != cache.dim {
            return Err(Error::DimensionMismatch { expected: cache.dim, actual: inner.dim() });
        }
        Ok(Self { inner, cache })
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn max_len(&self) -> usize {
        self.inner.max_len()
    }

    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>> {
        if purpose == EmbedPurpose::Query {
            return self.inner.embed(text, purpose).await;
        }
        let hash = content_hash(text);
        match self.cache.get(self.inner.id(), &hash).await {
            Ok(Some(v)) => {
                debug!(hash = %hash, "embedding cache hit");
                return Ok(v);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "embedding cache read failed"),
        }
        let v = self.inner.embed(text, purpose).await?;
        if let Err(e) = self.cache.put(self.inner.id(), &hash, &v).await {
            warn!(error = %e, "embedding cache write failed");
        }
        Ok(v)
    }
}
