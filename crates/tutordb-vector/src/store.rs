//! Persistent [`IndexStore`] over LanceDB.
//!
//! Four tables: `documents`, `chunks` (with the vector column), `questions`
//! and `live`. Writes stage rows under fresh ids and finish with one
//! merge_insert on `live`; reads resolve the pointer first.
//!
//! Staged rows are unreachable until the flip, so compaction leaves alone
//! anything staged within its grace window. That window also covers writers
//! in other processes, which `pointer_lock` cannot see.

use arrow_array::{FixedSizeListArray, Int32Array, Int64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use tutordb_core::store::{validate_chunks, validate_query};
use tutordb_core::traits::{rank_and_truncate, CompactionReport, IndexStore};
use tutordb_core::types::{
    Chunk, ChunkKind, Coordinate, EmbeddedChunk, GeneratedQuestion, Lane, RankedChunk, SourceDocument,
};
use tutordb_core::{Error, Result};

use crate::schema::{
    build_chunks_schema, build_documents_schema, build_live_schema, build_questions_schema, vector_dim,
    CHUNKS_TABLE, DOCUMENTS_TABLE, LIVE_TABLE, QUESTIONS_TABLE,
};
use crate::table::{
    all_live, append, ensure_table, get_live, in_list, ints, longs, open_db, quote, scan, set_live, strings,
    timestamps, LiveRow,
};

const OVERFETCH: usize = 4;
pub const DEFAULT_COMPACTION_GRACE: Duration = Duration::from_secs(600);

pub struct LanceIndexStore {
    conn: Connection,
    documents: Table,
    chunks: Table,
    questions: Table,
    dim: usize,
    max_top_k: usize,
    compaction_grace: Duration,
    /// Serialises pointer read-modify-write within this process.
    pointer_lock: Mutex<()>,
}

impl LanceIndexStore {
    /// Open (creating tables as needed) the store at `uri`. An existing chunk
    /// table with a different vector width is a `DimensionMismatch`.
    pub async fn open(uri: &str, dim: usize, max_top_k: usize) -> Result<Self> {
        let width = i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("dimension {dim} too large")))?;
        let conn = open_db(uri).await?;
        let documents = ensure_table(&conn, DOCUMENTS_TABLE, build_documents_schema()).await?;
        let chunks = ensure_table(&conn, CHUNKS_TABLE, build_chunks_schema(width)).await?;
        let questions = ensure_table(&conn, QUESTIONS_TABLE, build_questions_schema()).await?;
        ensure_table(&conn, LIVE_TABLE, build_live_schema()).await?;

        let schema = chunks.schema().await.map_err(Error::store)?;
        if let Some(actual) = vector_dim(&schema) {
            if actual != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual });
            }
        }
        info!(uri, dim, "opened lance index store");
        Ok(Self {
            conn,
            documents,
            chunks,
            questions,
            dim,
            max_top_k,
            compaction_grace: DEFAULT_COMPACTION_GRACE,
            pointer_lock: Mutex::new(()),
        })
    }

    /// How long a staged but unreachable row is protected from `compact`.
    pub fn with_compaction_grace(mut self, grace: Duration) -> Self {
        self.compaction_grace = grace;
        self
    }

    async fn stage_document(&self, document: &SourceDocument, chunks: &[EmbeddedChunk]) -> Result<()> {
        // A retried write may have left rows under the same id.
        let doc_filter = format!("doc_id = {}", quote(&document.id));
        self.chunks.delete(&doc_filter).await.map_err(Error::store)?;
        self.documents.delete(&format!("id = {}", quote(&document.id))).await.map_err(Error::store)?;

        let staged_at = Utc::now().timestamp_millis();
        append(&self.chunks, chunks_batch(chunks, self.dim, staged_at)?).await?;
        append(&self.documents, document_batch(document, staged_at)?).await?;
        debug!(doc_id = %document.id, chunks = chunks.len(), "staged document");
        Ok(())
    }

    async fn stage_questions(&self, coordinate: &Coordinate, questions: &[GeneratedQuestion]) -> Result<String> {
        let set_id = new_set_id(coordinate);
        let staged_at = Utc::now().timestamp_millis();
        append(&self.questions, questions_batch(&set_id, coordinate, questions, staged_at)?).await?;
        Ok(set_id)
    }

    async fn load_document(&self, doc_id: &str) -> Result<Option<SourceDocument>> {
        for batch in scan(&self.documents, Some(format!("id = {}", quote(doc_id)))).await? {
            if let Some(doc) = documents_from_batch(&batch)?.into_iter().next() {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    /// Values of `column` not in `keep`, among rows staged at or before
    /// `cutoff_ms`.
    async fn ids_outside(
        &self,
        table: &Table,
        column: &str,
        keep: &HashSet<String>,
        cutoff_ms: i64,
    ) -> Result<Vec<String>> {
        let mut stale = HashSet::new();
        let stream = table
            .query()
            .only_if(format!("staged_at_ms <= {cutoff_ms}"))
            .select(lancedb::query::Select::columns(&[column]))
            .execute()
            .await
            .map_err(Error::store)?;
        let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(Error::store)?;
        for batch in batches {
            let col = strings(&batch, column)?;
            for i in 0..batch.num_rows() {
                let id = col.value(i);
                if !keep.contains(id) {
                    stale.insert(id.to_string());
                }
            }
        }
        let mut stale: Vec<String> = stale.into_iter().collect();
        stale.sort();
        Ok(stale)
    }
}

fn new_set_id(coordinate: &Coordinate) -> String {
    let seed = format!("{}|{}", coordinate.key(), Utc::now().timestamp_nanos_opt().unwrap_or_default());
    format!("qs_{}", &blake3::hash(seed.as_bytes()).to_hex()[..16])
}

fn to_i32(v: usize) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

fn document_batch(d: &SourceDocument, staged_at: i64) -> Result<RecordBatch> {
    let c = &d.coordinate;
    RecordBatch::try_new(
        build_documents_schema(),
        vec![
            Arc::new(StringArray::from(vec![d.id.clone()])),
            Arc::new(StringArray::from(vec![c.key()])),
            Arc::new(StringArray::from(vec![c.subject.clone()])),
            Arc::new(StringArray::from(vec![c.chapter_id.clone()])),
            Arc::new(StringArray::from(vec![c.topic_id.clone()])),
            Arc::new(StringArray::from(vec![c.subtopic_id.clone()])),
            Arc::new(StringArray::from(vec![d.title.clone()])),
            Arc::new(StringArray::from(vec![d.source_name.clone()])),
            Arc::new(Int64Array::from(vec![d.byte_size as i64])),
            Arc::new(Int64Array::from(vec![d.text_chars as i64])),
            Arc::new(TimestampMillisecondArray::from(vec![d.ingested_at.timestamp_millis()])),
            Arc::new(Int32Array::from(vec![to_i32(d.fact_chunk_count)])),
            Arc::new(Int32Array::from(vec![to_i32(d.activity_chunk_count)])),
            Arc::new(Int32Array::from(vec![to_i32(d.question_count)])),
            Arc::new(Int64Array::from(vec![staged_at])),
        ],
    )
    .map_err(Error::store)
}

fn chunks_batch(chunks: &[EmbeddedChunk], dim: usize, staged_at: i64) -> Result<RecordBatch> {
    let width = to_i32(dim);
    let mut ids = Vec::new();
    let mut doc_ids = Vec::new();
    let mut keys = Vec::new();
    let mut subjects = Vec::new();
    let mut chapters = Vec::new();
    let mut topics = Vec::new();
    let mut subtopics = Vec::new();
    let mut kinds = Vec::new();
    let mut headings = Vec::new();
    let mut texts = Vec::new();
    let mut ordinals = Vec::new();
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::new();
    for e in chunks {
        let c = &e.chunk;
        ids.push(c.id.clone());
        doc_ids.push(c.doc_id.clone());
        keys.push(c.coordinate.key());
        subjects.push(c.coordinate.subject.clone());
        chapters.push(c.coordinate.chapter_id.clone());
        topics.push(c.coordinate.topic_id.clone());
        subtopics.push(c.coordinate.subtopic_id.clone());
        kinds.push(c.kind.as_str());
        headings.push(c.heading.clone());
        texts.push(c.text.clone());
        ordinals.push(to_i32(c.ordinal));
        vectors.push(Some(e.embedding.iter().map(|&x| Some(x)).collect()));
    }
    RecordBatch::try_new(
        build_chunks_schema(width),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(doc_ids)),
            Arc::new(StringArray::from(keys)),
            Arc::new(StringArray::from(subjects)),
            Arc::new(StringArray::from(chapters)),
            Arc::new(StringArray::from(topics)),
            Arc::new(StringArray::from(subtopics)),
            Arc::new(StringArray::from(kinds)),
            Arc::new(StringArray::from(headings)),
            Arc::new(StringArray::from(texts)),
            Arc::new(Int32Array::from(ordinals)),
            Arc::new(Int64Array::from(vec![staged_at; chunks.len()])),
            Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                vectors.into_iter(),
                width,
            )),
        ],
    )
    .map_err(Error::store)
}

fn questions_batch(
    set_id: &str,
    coordinate: &Coordinate,
    questions: &[GeneratedQuestion],
    staged_at: i64,
) -> Result<RecordBatch> {
    let mut payloads = Vec::with_capacity(questions.len());
    for q in questions {
        payloads.push(serde_json::to_string(q).map_err(Error::store)?);
    }
    let n = questions.len();
    RecordBatch::try_new(
        build_questions_schema(),
        vec![
            Arc::new(StringArray::from(questions.iter().map(|q| format!("{set_id}:{}", q.id)).collect::<Vec<_>>())),
            Arc::new(StringArray::from(vec![set_id.to_string(); n])),
            Arc::new(StringArray::from(vec![coordinate.key(); n])),
            Arc::new(Int32Array::from((0..n).map(to_i32).collect::<Vec<_>>())),
            Arc::new(StringArray::from(payloads)),
            Arc::new(Int64Array::from(vec![staged_at; n])),
        ],
    )
    .map_err(Error::store)
}

fn documents_from_batch(batch: &RecordBatch) -> Result<Vec<SourceDocument>> {
    let id = strings(batch, "id")?;
    let subject = strings(batch, "subject")?;
    let chapter = strings(batch, "chapter_id")?;
    let topic = strings(batch, "topic_id")?;
    let subtopic = strings(batch, "subtopic_id")?;
    let title = strings(batch, "title")?;
    let source = strings(batch, "source_name")?;
    let byte_size = longs(batch, "byte_size")?;
    let text_chars = longs(batch, "text_chars")?;
    let ingested = timestamps(batch, "ingested_at")?;
    let facts = ints(batch, "fact_chunk_count")?;
    let activities = ints(batch, "activity_chunk_count")?;
    let questions = ints(batch, "question_count")?;
    Ok((0..batch.num_rows())
        .map(|i| SourceDocument {
            id: id.value(i).to_string(),
            coordinate: Coordinate {
                subject: subject.value(i).to_string(),
                chapter_id: chapter.value(i).to_string(),
                topic_id: topic.value(i).to_string(),
                subtopic_id: subtopic.value(i).to_string(),
            },
            title: title.value(i).to_string(),
            source_name: source.value(i).to_string(),
            byte_size: usize::try_from(byte_size.value(i)).unwrap_or_default(),
            text_chars: usize::try_from(text_chars.value(i)).unwrap_or_default(),
            ingested_at: DateTime::<Utc>::from_timestamp_millis(ingested.value(i)).unwrap_or_default(),
            fact_chunk_count: usize::try_from(facts.value(i)).unwrap_or_default(),
            activity_chunk_count: usize::try_from(activities.value(i)).unwrap_or_default(),
            question_count: usize::try_from(questions.value(i)).unwrap_or_default(),
        })
        .collect())
}

fn chunks_from_batch(batch: &RecordBatch) -> Result<Vec<Chunk>> {
    let id = strings(batch, "id")?;
    let doc_id = strings(batch, "doc_id")?;
    let subject = strings(batch, "subject")?;
    let chapter = strings(batch, "chapter_id")?;
    let topic = strings(batch, "topic_id")?;
    let subtopic = strings(batch, "subtopic_id")?;
    let kind = strings(batch, "kind")?;
    let heading = strings(batch, "heading")?;
    let text = strings(batch, "text")?;
    let ordinal = ints(batch, "ordinal")?;
    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let kind = ChunkKind::parse(kind.value(i))
            .ok_or_else(|| Error::StoreUnavailable(format!("unknown chunk kind '{}'", kind.value(i))))?;
        out.push(Chunk {
            id: id.value(i).to_string(),
            doc_id: doc_id.value(i).to_string(),
            coordinate: Coordinate {
                subject: subject.value(i).to_string(),
                chapter_id: chapter.value(i).to_string(),
                topic_id: topic.value(i).to_string(),
                subtopic_id: subtopic.value(i).to_string(),
            },
            kind,
            heading: heading.value(i).to_string(),
            text: text.value(i).to_string(),
            ordinal: usize::try_from(ordinal.value(i)).unwrap_or_default(),
        });
    }
    Ok(out)
}

/// Cosine distance column to similarity; rows without it score 0.
fn scores_from_batch(batch: &RecordBatch) -> Vec<f32> {
    match batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<arrow_array::Float32Array>()) {
        Some(d) => (0..batch.num_rows()).map(|i| 1.0 - d.value(i)).collect(),
        None => vec![0.0; batch.num_rows()],
    }
}

#[async_trait]
impl IndexStore for LanceIndexStore {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn put(&self, document: &SourceDocument, chunks: &[EmbeddedChunk]) -> Result<()> {
        validate_chunks(self.dim, document, chunks)?;
        self.stage_document(document, chunks).await?;
        let key = document.coordinate.key();
        let _guard = self.pointer_lock.lock().await;
        let current = get_live(&self.conn, &key).await?;
        set_live(&self.conn, &key, &LiveRow { doc_id: Some(document.id.clone()), ..current }).await
    }

    async fn put_questions(&self, coordinate: &Coordinate, questions: &[GeneratedQuestion]) -> Result<()> {
        let set_id = self.stage_questions(coordinate, questions).await?;
        let key = coordinate.key();
        let _guard = self.pointer_lock.lock().await;
        let current = get_live(&self.conn, &key).await?;
        set_live(&self.conn, &key, &LiveRow { question_set_id: Some(set_id), ..current }).await
    }

    async fn replace(
        &self,
        document: &SourceDocument,
        chunks: &[EmbeddedChunk],
        questions: &[GeneratedQuestion],
    ) -> Result<()> {
        validate_chunks(self.dim, document, chunks)?;
        self.stage_document(document, chunks).await?;
        let set_id = self.stage_questions(&document.coordinate, questions).await?;
        let _guard = self.pointer_lock.lock().await;
        set_live(
            &self.conn,
            &document.coordinate.key(),
            &LiveRow { doc_id: Some(document.id.clone()), question_set_id: Some(set_id) },
        )
        .await?;
        info!(coordinate = %document.coordinate, doc_id = %document.id, "live pointer flipped");
        Ok(())
    }

    async fn query(&self, coordinate: &Coordinate, lane: Lane, vector: &[f32], top_k: usize) -> Result<Vec<RankedChunk>> {
        let top_k = validate_query(self.dim, self.max_top_k, vector, top_k)?;
        let Some(doc_id) = get_live(&self.conn, &coordinate.key()).await?.doc_id else {
            return Ok(Vec::new());
        };
        let mut filter = format!("doc_id = {} AND coordinate_key = {}", quote(&doc_id), quote(&coordinate.key()));
        if let Some(kind) = lane.kind() {
            filter.push_str(&format!(" AND kind = {}", quote(kind.as_str())));
        }
        let stream = self
            .chunks
            .vector_search(vector.to_vec())
            .map_err(Error::store)?
            .distance_type(DistanceType::Cosine)
            .only_if(filter)
            .limit(top_k * OVERFETCH)
            .execute()
            .await
            .map_err(Error::store)?;
        let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(Error::store)?;

        let mut hits = Vec::new();
        for batch in &batches {
            let scores = scores_from_batch(batch);
            for (chunk, score) in chunks_from_batch(batch)?.into_iter().zip(scores) {
                hits.push(RankedChunk { chunk, score });
            }
        }
        rank_and_truncate(&mut hits, top_k);
        debug!(coordinate = %coordinate, lane = lane.as_str(), hits = hits.len(), "lance query");
        Ok(hits)
    }

    async fn get_questions(&self, coordinate: &Coordinate, limit: usize) -> Result<Vec<GeneratedQuestion>> {
        let Some(set_id) = get_live(&self.conn, &coordinate.key()).await?.question_set_id else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<(i32, GeneratedQuestion)> = Vec::new();
        for batch in scan(&self.questions, Some(format!("set_id = {}", quote(&set_id)))).await? {
            let position = ints(&batch, "position")?;
            let payload = strings(&batch, "payload")?;
            for i in 0..batch.num_rows() {
                let q: GeneratedQuestion = serde_json::from_str(payload.value(i)).map_err(Error::store)?;
                rows.push((position.value(i), q));
            }
        }
        rows.sort_by_key(|(p, _)| *p);
        Ok(rows.into_iter().take(limit).map(|(_, q)| q).collect())
    }

    async fn live_document(&self, coordinate: &Coordinate) -> Result<Option<SourceDocument>> {
        match get_live(&self.conn, &coordinate.key()).await?.doc_id {
            Some(doc_id) => self.load_document(&doc_id).await,
            None => Ok(None),
        }
    }

    async fn document_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for batch in scan(&self.chunks, Some(format!("doc_id = {}", quote(doc_id)))).await? {
            chunks.extend(chunks_from_batch(&batch)?);
        }
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
    }

    async fn compact(&self) -> Result<CompactionReport> {
        let _guard = self.pointer_lock.lock().await;
        let live = all_live(&self.conn).await?;
        let live_docs: HashSet<String> = live.iter().filter_map(|r| r.doc_id.clone()).collect();
        let live_sets: HashSet<String> = live.iter().filter_map(|r| r.question_set_id.clone()).collect();
        let grace = chrono::Duration::from_std(self.compaction_grace).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(grace)
            .map_or(i64::MIN, |t| t.timestamp_millis());

        let mut report = CompactionReport::default();
        let stale_docs = self.ids_outside(&self.documents, "id", &live_docs, cutoff).await?;
        if !stale_docs.is_empty() {
            let chunk_filter = in_list("doc_id", &stale_docs);
            report.chunks_removed = self.chunks.count_rows(Some(chunk_filter.clone())).await.map_err(Error::store)?;
            self.chunks.delete(&chunk_filter).await.map_err(Error::store)?;
            self.documents.delete(&in_list("id", &stale_docs)).await.map_err(Error::store)?;
            report.documents_removed = stale_docs.len();
        }
        // Chunks staged by a write that never flipped the pointer.
        let orphan_chunk_docs = self.ids_outside(&self.chunks, "doc_id", &live_docs, cutoff).await?;
        if !orphan_chunk_docs.is_empty() {
            let filter = format!("{} AND staged_at_ms <= {cutoff}", in_list("doc_id", &orphan_chunk_docs));
            report.chunks_removed += self.chunks.count_rows(Some(filter.clone())).await.map_err(Error::store)?;
            self.chunks.delete(&filter).await.map_err(Error::store)?;
        }
        let stale_sets = self.ids_outside(&self.questions, "set_id", &live_sets, cutoff).await?;
        if !stale_sets.is_empty() {
            let filter = in_list("set_id", &stale_sets);
            report.questions_removed = self.questions.count_rows(Some(filter.clone())).await.map_err(Error::store)?;
            self.questions.delete(&filter).await.map_err(Error::store)?;
        }
        info!(?report, "compacted lance index store");
        Ok(report)
    }
}
