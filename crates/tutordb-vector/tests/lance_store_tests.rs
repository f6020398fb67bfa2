use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tutordb_core::error::Error;
use tutordb_core::traits::{EmbedPurpose, Embedder, IndexStore};
use tutordb_core::types::{
    Chunk, ChunkKind, Coordinate, EmbeddedChunk, GeneratedQuestion, Lane, QuestionAnswer, QuestionKind, SourceDocument,
};
use tutordb_embed::HashEmbedder;
use tutordb_vector::{CachedEmbedder, EmbeddingCache, LanceIndexStore};

fn coordinate(subtopic: &str) -> Coordinate {
    Coordinate::new("Science", "electricity-circuits", "circuits-and-switches", subtopic).unwrap()
}

fn document(id: &str, coordinate: &Coordinate) -> SourceDocument {
    SourceDocument {
        id: id.to_string(),
        coordinate: coordinate.clone(),
        title: "Closed and Open Circuits".to_string(),
        source_name: "circuits.md".to_string(),
        byte_size: 2048,
        text_chars: 1900,
        ingested_at: Utc::now(),
        fact_chunk_count: 2,
        activity_chunk_count: 1,
        question_count: 2,
    }
}

fn chunk(doc: &SourceDocument, ordinal: usize, kind: ChunkKind, embedding: Vec<f32>) -> EmbeddedChunk {
    EmbeddedChunk {
        chunk: Chunk {
            id: format!("{}:{}", doc.id, ordinal),
            doc_id: doc.id.clone(),
            coordinate: doc.coordinate.clone(),
            kind,
            heading: "Closed circuit".to_string(),
            text: format!("chunk number {ordinal}"),
            ordinal,
        },
        embedding,
    }
}

fn question(doc_id: &str, coordinate: &Coordinate, n: usize) -> GeneratedQuestion {
    GeneratedQuestion {
        id: format!("{doc_id}:q{n}"),
        doc_id: doc_id.to_string(),
        coordinate: coordinate.clone(),
        kind: QuestionKind::Short,
        prompt: format!("Question {n}?"),
        options: vec![],
        answer: QuestionAnswer { correct: "a path".into(), explanation: "from the text".into() },
        hint: Some("look at the first section".into()),
        source_chunk_ids: vec![format!("{doc_id}:0")],
    }
}

fn sample(doc: &SourceDocument) -> Vec<EmbeddedChunk> {
    vec![
        chunk(doc, 0, ChunkKind::Fact, vec![1.0, 0.0, 0.0, 0.0]),
        chunk(doc, 1, ChunkKind::Fact, vec![0.6, 0.8, 0.0, 0.0]),
        chunk(doc, 2, ChunkKind::Activity, vec![1.0, 0.0, 0.0, 0.0]),
    ]
}

#[tokio::test]
async fn replace_then_query_ranks_within_lane() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();
    let store = LanceIndexStore::open(&uri, 4, 10).await?;
    let c = coordinate("closed-open-circuits");
    let doc = document("doc_a", &c);
    store.replace(&doc, &sample(&doc), &[question("doc_a", &c, 0), question("doc_a", &c, 1)]).await?;

    let hits = store.query(&c, Lane::Fact, &[1.0, 0.0, 0.0, 0.0], 5).await?;
    let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
    assert_eq!(ids, vec!["doc_a:0", "doc_a:1"]);
    assert!((hits[0].score - 1.0).abs() < 1e-4);
    assert!(hits.iter().all(|h| h.chunk.kind == ChunkKind::Fact));

    let both = store.query(&c, Lane::Both, &[1.0, 0.0, 0.0, 0.0], 2).await?;
    assert_eq!(both.len(), 2);
    assert_eq!(both[0].chunk.ordinal, 0, "equal scores fall back to ordinal order");
    assert_eq!(both[1].chunk.ordinal, 2);

    let other = store.query(&coordinate("series-circuits"), Lane::Both, &[1.0, 0.0, 0.0, 0.0], 5).await?;
    assert!(other.is_empty());
    Ok(())
}

#[tokio::test]
async fn reingest_supersedes_and_compact_removes_orphans() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();
    let store = LanceIndexStore::open(&uri, 4, 10).await?.with_compaction_grace(Duration::ZERO);
    let c = coordinate("closed-open-circuits");

    let first = document("doc_first", &c);
    store.replace(&first, &sample(&first), &[question("doc_first", &c, 0)]).await?;
    let second = document("doc_second", &c);
    store
        .replace(&second, &sample(&second)[..2], &[question("doc_second", &c, 0), question("doc_second", &c, 1)])
        .await?;

    let hits = store.query(&c, Lane::Both, &[1.0, 0.0, 0.0, 0.0], 10).await?;
    assert!(hits.iter().all(|h| h.chunk.doc_id == "doc_second"));
    let qs = store.get_questions(&c, 10).await?;
    let ids: Vec<&str> = qs.iter().map(|q| q.id.as_str()).collect();
    assert_eq!(ids, vec!["doc_second:q0", "doc_second:q1"]);
    assert_eq!(qs[0].hint.as_deref(), Some("look at the first section"));
    assert_eq!(store.live_document(&c).await?.map(|d| d.id), Some("doc_second".to_string()));

    let report = store.compact().await?;
    assert_eq!(report.documents_removed, 1);
    assert_eq!(report.chunks_removed, 3);
    assert_eq!(report.questions_removed, 1);
    assert!(store.document_chunks("doc_first").await?.is_empty());
    assert_eq!(store.document_chunks("doc_second").await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn default_grace_keeps_recently_superseded_rows() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();
    let store = LanceIndexStore::open(&uri, 4, 10).await?;
    let c = coordinate("closed-open-circuits");
    let first = document("doc_first", &c);
    store.replace(&first, &sample(&first), &[]).await?;
    let second = document("doc_second", &c);
    store.replace(&second, &sample(&second), &[]).await?;

    assert_eq!(store.compact().await?, Default::default());
    assert_eq!(store.document_chunks("doc_first").await?.len(), 3);
    assert!(store.query(&c, Lane::Both, &[1.0, 0.0, 0.0, 0.0], 10).await?.iter().all(|h| h.chunk.doc_id == "doc_second"));
    Ok(())
}

#[tokio::test]
async fn reopen_keeps_live_data_and_checks_dimension() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();
    let c = coordinate("closed-open-circuits");
    {
        let store = LanceIndexStore::open(&uri, 4, 10).await?;
        let doc = document("doc_a", &c);
        store.replace(&doc, &sample(&doc), &[]).await?;
    }
    let reopened = LanceIndexStore::open(&uri, 4, 10).await?;
    let doc = reopened.live_document(&c).await?.expect("live document");
    assert_eq!(doc.title, "Closed and Open Circuits");
    assert_eq!(doc.fact_chunk_count, 2);

    match LanceIndexStore::open(&uri, 8, 10).await {
        Err(Error::DimensionMismatch { expected: 8, actual: 4 }) => {}
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("dimension change must be rejected"),
    }
    Ok(())
}

#[tokio::test]
async fn query_rejects_wrong_dimension_and_zero_top_k() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();
    let store = LanceIndexStore::open(&uri, 4, 10).await?;
    let c = coordinate("closed-open-circuits");
    assert!(matches!(store.query(&c, Lane::Both, &[1.0, 0.0], 3).await, Err(Error::DimensionMismatch { .. })));
    assert!(matches!(store.query(&c, Lane::Both, &[1.0, 0.0, 0.0, 0.0], 0).await, Err(Error::InvalidArgument(_))));
    Ok(())
}

struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn id(&self) -> &str {
        self.inner.id()
    }
    fn dim(&self) -> usize {
        self.inner.dim()
    }
    fn max_len(&self) -> usize {
        self.inner.max_len()
    }
    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> tutordb_core::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text, purpose).await
    }
}

#[tokio::test]
async fn cached_embedder_writes_through_for_documents_only() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();
    let counting = Arc::new(CountingEmbedder { inner: HashEmbedder::new(16), calls: AtomicUsize::new(0) });
    let cache = EmbeddingCache::open(&uri, 16).await?;
    let embedder = CachedEmbedder::new(counting.clone(), cache)?;

    let a = embedder.embed("A closed circuit is a complete path.", EmbedPurpose::Document).await?;
    let b = embedder.embed("A closed circuit is a complete path.", EmbedPurpose::Document).await?;
    assert_eq!(a, b);
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

    embedder.embed("A closed circuit is a complete path.", EmbedPurpose::Query).await?;
    embedder.embed("A closed circuit is a complete path.", EmbedPurpose::Query).await?;
    assert_eq!(counting.calls.load(Ordering::SeqCst), 3);

    let reopened = EmbeddingCache::open(&uri, 16).await?;
    assert_eq!(reopened.entry_count().await?, 1);
    assert_eq!(reopened.embedder_ids().await?, vec!["hash:d16".to_string()]);
    assert!(matches!(EmbeddingCache::open(&uri, 32).await, Err(Error::DimensionMismatch { .. })));
    Ok(())
}
