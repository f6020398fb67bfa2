//! Arrow schemas for the Lance tables. Vector columns are sized by the
//! configured embedding dimension.

use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

pub const DOCUMENTS_TABLE: &str = "documents";
pub const CHUNKS_TABLE: &str = "chunks";
pub const QUESTIONS_TABLE: &str = "questions";
pub const LIVE_TABLE: &str = "live";
pub const EMBED_CACHE_TABLE: &str = "emb_cache";

fn vector_field(dim: i32) -> Field {
    Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true)
}

/// Staging time in epoch millis. Compaction only reclaims unreachable rows
/// staged before its grace cutoff.
fn staged_field() -> Field {
    Field::new("staged_at_ms", DataType::Int64, false)
}

fn timestamp_field(name: &str) -> Field {
    Field::new(name, DataType::Timestamp(TimeUnit::Millisecond, None), false)
}

pub fn build_documents_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("coordinate_key", DataType::Utf8, false),
        Field::new("subject", DataType::Utf8, false),
        Field::new("chapter_id", DataType::Utf8, false),
        Field::new("topic_id", DataType::Utf8, false),
        Field::new("subtopic_id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("source_name", DataType::Utf8, false),
        Field::new("byte_size", DataType::Int64, false),
        Field::new("text_chars", DataType::Int64, false),
        timestamp_field("ingested_at"),
        Field::new("fact_chunk_count", DataType::Int32, false),
        Field::new("activity_chunk_count", DataType::Int32, false),
        Field::new("question_count", DataType::Int32, false),
        staged_field(),
    ]))
}

pub fn build_chunks_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("doc_id", DataType::Utf8, false),
        Field::new("coordinate_key", DataType::Utf8, false),
        Field::new("subject", DataType::Utf8, false),
        Field::new("chapter_id", DataType::Utf8, false),
        Field::new("topic_id", DataType::Utf8, false),
        Field::new("subtopic_id", DataType::Utf8, false),
        Field::new("kind", DataType::Utf8, false),
        Field::new("heading", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("ordinal", DataType::Int32, false),
        staged_field(),
        vector_field(dim),
    ]))
}

/// Question rows keep the full question as JSON in `payload`; `position`
/// preserves generation order within a set.
pub fn build_questions_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("set_id", DataType::Utf8, false),
        Field::new("coordinate_key", DataType::Utf8, false),
        Field::new("position", DataType::Int32, false),
        Field::new("payload", DataType::Utf8, false),
        staged_field(),
    ]))
}

pub fn build_live_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("coordinate_key", DataType::Utf8, false),
        Field::new("doc_id", DataType::Utf8, true),
        Field::new("question_set_id", DataType::Utf8, true),
        timestamp_field("updated_at"),
    ]))
}

pub fn build_cache_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("embedder_id", DataType::Utf8, false),
        timestamp_field("created_at"),
        vector_field(dim),
    ]))
}

/// Width of the `vector` column, if the schema has one.
pub fn vector_dim(schema: &Schema) -> Option<usize> {
    match schema.field_with_name("vector").ok()?.data_type() {
        DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
        _ => None,
    }
}
