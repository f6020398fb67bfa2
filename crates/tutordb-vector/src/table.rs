//! LanceDB connection and housekeeping helpers.
//!
//! Database open, ensure-* helpers for tables, typed column access for
//! record batches, and the live-pointer table that maps each coordinate to
//! its current document and question set.

use arrow_array::{
    Array, FixedSizeListArray, Int32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray,
    TimestampMillisecondArray,
};
use arrow_array::cast::AsArray;
use arrow_schema::Schema;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, Table};
use std::sync::Arc;

use tutordb_core::{Error, Result};

use crate::schema::{build_live_schema, LIVE_TABLE};

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(Error::store)
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<Table> {
    let names = conn.table_names().execute().await.map_err(Error::store)?;
    if !names.iter().any(|n| n == name) {
        // create empty table with 0 rows
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
        conn.create_table(name, Box::new(iter)).execute().await.map_err(Error::store)?;
    }
    conn.open_table(name).execute().await.map_err(Error::store)
}

/// Quote a string literal for a Lance filter expression.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `column IN ('a', 'b')`; `false` for an empty set.
pub fn in_list(column: &str, values: &[String]) -> String {
    if values.is_empty() {
        return "false".to_string();
    }
    let quoted: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("{} IN ({})", column, quoted.join(", "))
}

pub async fn append(table: &Table, batch: RecordBatch) -> Result<()> {
    if batch.num_rows() == 0 {
        return Ok(());
    }
    let schema = batch.schema();
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    table.add(reader).execute().await.map_err(Error::store)?;
    Ok(())
}

/// Run a filtered scan and collect every batch.
pub async fn scan(table: &Table, filter: Option<String>) -> Result<Vec<RecordBatch>> {
    let mut query = table.query();
    if let Some(f) = filter {
        query = query.only_if(f);
    }
    let stream = query.execute().await.map_err(Error::store)?;
    stream.try_collect().await.map_err(Error::store)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::StoreUnavailable(format!("column '{name}' missing or mistyped")))
}

pub fn strings<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    column(batch, name)
}

pub fn ints<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    column(batch, name)
}

pub fn longs<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    column(batch, name)
}

pub fn timestamps<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a TimestampMillisecondArray> {
    column(batch, name)
}

pub fn vectors<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a FixedSizeListArray> {
    column(batch, name)
}

pub fn vector_at(col: &FixedSizeListArray, i: usize) -> Vec<f32> {
    col.value(i).as_primitive::<arrow_array::types::Float32Type>().values().to_vec()
}

pub fn optional_string(col: &StringArray, i: usize) -> Option<String> {
    col.is_valid(i).then(|| col.value(i).to_string())
}

/// Current live pointer of one coordinate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveRow {
    pub doc_id: Option<String>,
    pub question_set_id: Option<String>,
}

pub async fn get_live(conn: &Connection, coordinate_key: &str) -> Result<LiveRow> {
    let t = ensure_table(conn, LIVE_TABLE, build_live_schema()).await?;
    for batch in scan(&t, Some(format!("coordinate_key = {}", quote(coordinate_key)))).await? {
        if batch.num_rows() == 0 {
            continue;
        }
        return Ok(LiveRow {
            doc_id: optional_string(strings(&batch, "doc_id")?, 0),
            question_set_id: optional_string(strings(&batch, "question_set_id")?, 0),
        });
    }
    Ok(LiveRow::default())
}

/// Every live pointer in the database.
pub async fn all_live(conn: &Connection) -> Result<Vec<LiveRow>> {
    let t = ensure_table(conn, LIVE_TABLE, build_live_schema()).await?;
    let mut rows = Vec::new();
    for batch in scan(&t, None).await? {
        let docs = strings(&batch, "doc_id")?;
        let sets = strings(&batch, "question_set_id")?;
        for i in 0..batch.num_rows() {
            rows.push(LiveRow { doc_id: optional_string(docs, i), question_set_id: optional_string(sets, i) });
        }
    }
    Ok(rows)
}

/// Flip a coordinate's pointer. One merge_insert, so readers see either the
/// old row or the new one.
pub async fn set_live(conn: &Connection, coordinate_key: &str, row: &LiveRow) -> Result<()> {
    let t = ensure_table(conn, LIVE_TABLE, build_live_schema()).await?;
    let rb = RecordBatch::try_new(
        build_live_schema(),
        vec![
            Arc::new(StringArray::from(vec![coordinate_key.to_string()])),
            Arc::new(StringArray::from(vec![row.doc_id.clone()])),
            Arc::new(StringArray::from(vec![row.question_set_id.clone()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .map_err(Error::store)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_live_schema()));
    // Upsert behavior via merge_insert: coordinate_key is unique
    let mut mi = t.merge_insert(&["coordinate_key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await.map_err(Error::store)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(quote("it's"), "'it''s'");
    }

    #[test]
    fn in_list_handles_empty_and_many() {
        assert_eq!(in_list("id", &[]), "false");
        assert_eq!(in_list("id", &["a".to_string(), "b".to_string()]), "id IN ('a', 'b')");
    }
}
