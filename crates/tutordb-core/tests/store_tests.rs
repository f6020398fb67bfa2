use chrono::Utc;

use tutordb_core::error::Error;
use tutordb_core::store::MemoryIndexStore;
use tutordb_core::traits::IndexStore;
use tutordb_core::types::{
    Chunk, ChunkKind, Coordinate, EmbeddedChunk, GeneratedQuestion, Lane, QuestionAnswer, QuestionKind, SourceDocument,
};

fn coordinate(subtopic: &str) -> Coordinate {
    Coordinate::new("Science", "electricity-circuits", "circuits-and-switches", subtopic).unwrap()
}

fn document(id: &str, coordinate: &Coordinate) -> SourceDocument {
    SourceDocument {
        id: id.to_string(),
        coordinate: coordinate.clone(),
        title: "Closed and Open Circuits".to_string(),
        source_name: "circuits.pdf".to_string(),
        byte_size: 1024,
        text_chars: 512,
        ingested_at: Utc::now(),
        fact_chunk_count: 0,
        activity_chunk_count: 0,
        question_count: 0,
    }
}

fn chunk(doc: &SourceDocument, ordinal: usize, kind: ChunkKind, embedding: Vec<f32>) -> EmbeddedChunk {
    EmbeddedChunk {
        chunk: Chunk {
            id: format!("{}:{}", doc.id, ordinal),
            doc_id: doc.id.clone(),
            coordinate: doc.coordinate.clone(),
            kind,
            heading: "General".to_string(),
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
        answer: QuestionAnswer { correct: "yes".into(), explanation: "because".into() },
        hint: None,
        source_chunk_ids: vec![],
    }
}

#[tokio::test]
async fn query_filters_by_coordinate_and_lane_and_ranks() {
    let store = MemoryIndexStore::new(2, 10);
    let c = coordinate("closed-open-circuits");
    let other = coordinate("series-circuits");
    let doc = document("doc_a", &c);
    let chunks = vec![
        chunk(&doc, 0, ChunkKind::Fact, vec![1.0, 0.0]),
        chunk(&doc, 1, ChunkKind::Fact, vec![0.0, 1.0]),
        chunk(&doc, 2, ChunkKind::Activity, vec![1.0, 0.0]),
        chunk(&doc, 3, ChunkKind::Fact, vec![0.7, 0.7]),
    ];
    store.put(&doc, &chunks).await.unwrap();
    let other_doc = document("doc_b", &other);
    store.put(&other_doc, &[chunk(&other_doc, 0, ChunkKind::Fact, vec![1.0, 0.0])]).await.unwrap();

    let hits = store.query(&c, Lane::Fact, &[1.0, 0.0], 10).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
    assert_eq!(ids, vec!["doc_a:0", "doc_a:3", "doc_a:1"]);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(hits.iter().all(|h| h.chunk.kind == ChunkKind::Fact && h.chunk.coordinate == c));

    let both = store.query(&c, Lane::Both, &[1.0, 0.0], 2).await.unwrap();
    assert_eq!(both.len(), 2);
    // Equal scores fall back to ordinal order.
    assert_eq!(both[0].chunk.id, "doc_a:0");
    assert_eq!(both[1].chunk.id, "doc_a:2");
}

#[tokio::test]
async fn top_k_is_validated_and_clamped() {
    let store = MemoryIndexStore::new(2, 3);
    let c = coordinate("closed-open-circuits");
    let doc = document("doc_a", &c);
    let chunks: Vec<_> = (0..6).map(|i| chunk(&doc, i, ChunkKind::Fact, vec![1.0, i as f32])).collect();
    store.put(&doc, &chunks).await.unwrap();

    assert!(matches!(store.query(&c, Lane::Both, &[1.0, 0.0], 0).await, Err(Error::InvalidArgument(_))));
    assert_eq!(store.query(&c, Lane::Both, &[1.0, 0.0], 50).await.unwrap().len(), 3);
}

#[tokio::test]
async fn empty_coordinate_returns_no_chunks() {
    let store = MemoryIndexStore::new(2, 10);
    let hits = store.query(&coordinate("nothing-here"), Lane::Fact, &[1.0, 0.0], 5).await.unwrap();
    assert!(hits.is_empty());
    assert!(store.get_questions(&coordinate("nothing-here"), 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn dimension_mismatch_rejects_write_and_query() {
    let store = MemoryIndexStore::new(3, 10);
    let c = coordinate("closed-open-circuits");
    let doc = document("doc_a", &c);
    let err = store.put(&doc, &[chunk(&doc, 0, ChunkKind::Fact, vec![1.0, 0.0])]).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));
    assert!(store.live_document(&c).await.unwrap().is_none());
    assert!(store.document_chunks("doc_a").await.unwrap().is_empty());

    let err = store.query(&c, Lane::Both, &[1.0], 1).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));
}

#[tokio::test]
async fn replace_supersedes_previous_sets_and_compaction_removes_orphans() {
    let store = MemoryIndexStore::new(2, 10);
    let c = coordinate("closed-open-circuits");
    let first = document("doc_1", &c);
    store
        .replace(&first, &[chunk(&first, 0, ChunkKind::Fact, vec![1.0, 0.0]), chunk(&first, 1, ChunkKind::Fact, vec![0.0, 1.0])], &[question("doc_1", &c, 1), question("doc_1", &c, 2)])
        .await
        .unwrap();
    let second = document("doc_2", &c);
    store
        .replace(&second, &[chunk(&second, 0, ChunkKind::Fact, vec![1.0, 0.0])], &[question("doc_2", &c, 1)])
        .await
        .unwrap();

    let hits = store.query(&c, Lane::Both, &[1.0, 0.0], 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.doc_id, "doc_2");
    let questions = store.get_questions(&c, 10).await.unwrap();
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0].doc_id, "doc_2");
    assert_eq!(store.live_document(&c).await.unwrap().unwrap().id, "doc_2");

    let report = store.compact().await.unwrap();
    assert_eq!(report.documents_removed, 1);
    assert_eq!(report.chunks_removed, 2);
    assert_eq!(report.questions_removed, 2);
    assert!(store.document_chunks("doc_1").await.unwrap().is_empty());
    assert_eq!(store.document_chunks("doc_2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn questions_respect_limit_and_stored_order() {
    let store = MemoryIndexStore::new(2, 10);
    let c = coordinate("closed-open-circuits");
    let qs: Vec<_> = (1..=4).map(|n| question("doc_1", &c, n)).collect();
    store.put_questions(&c, &qs).await.unwrap();
    let got = store.get_questions(&c, 2).await.unwrap();
    assert_eq!(got.iter().map(|q| q.id.as_str()).collect::<Vec<_>>(), vec!["doc_1:q1", "doc_1:q2"]);
    assert_eq!(store.get_questions(&c, 10).await.unwrap().len(), 4);
}

#[tokio::test]
async fn chunk_from_foreign_document_is_rejected() {
    let store = MemoryIndexStore::new(2, 10);
    let c = coordinate("closed-open-circuits");
    let doc = document("doc_a", &c);
    let foreign = document("doc_x", &c);
    let err = store.put(&doc, &[chunk(&foreign, 0, ChunkKind::Fact, vec![1.0, 0.0])]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}
