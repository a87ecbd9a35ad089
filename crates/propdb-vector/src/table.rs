//! LanceDB connection, write and read helpers for chunk tables.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use propdb_core::error::{EmbeddingFailure, Error, Result};
use propdb_core::types::{IndexRecord, QueryResult, RecordMetadata};

use crate::schema::chunk_schema;

/// Rows per Arrow batch when writing.
const WRITE_BATCH: usize = 1000;

pub(crate) fn lance_err<E: Display>(context: &str) -> impl FnOnce(E) -> Error + '_ {
    move |e| Error::persistence(format!("{context}: {e}"))
}

pub async fn open_db(dir: &Path) -> Result<Connection> {
    connect(dir.to_string_lossy().as_ref())
        .execute()
        .await
        .map_err(lance_err("opening LanceDB"))
}

pub async fn open_table(conn: &Connection, name: &str) -> Result<Table> {
    conn.open_table(name).execute().await.map_err(lance_err("opening table"))
}

/// Creates `name` holding exactly `records`.
pub async fn create_table(conn: &Connection, name: &str, records: &[IndexRecord], dim: usize) -> Result<Table> {
    let dim_i32 = i32::try_from(dim).map_err(|_| Error::config(format!("dimension {dim} too large")))?;
    let schema = chunk_schema(dim_i32);
    let batches = records
        .chunks(WRITE_BATCH)
        .map(|batch| records_to_batch(batch, dim_i32))
        .collect::<Result<Vec<_>>>()?;
    let reader = Box::new(RecordBatchIterator::new(batches.into_iter().map(Ok), schema));
    conn.create_table(name, reader)
        .execute()
        .await
        .map_err(lance_err("creating table"))
}

pub async fn count_rows(table: &Table) -> Result<usize> {
    table.count_rows(None).await.map_err(lance_err("counting rows"))
}

/// Cosine nearest neighbours of `vector`, at most `limit` rows.
pub async fn nearest(table: &Table, vector: &[f32], limit: usize) -> Result<Vec<QueryResult>> {
    let mut stream = table
        .vector_search(vector.to_vec())
        .map_err(lance_err("preparing vector search"))?
        .distance_type(DistanceType::Cosine)
        .limit(limit)
        .execute()
        .await
        .map_err(lance_err("vector search"))?;
    let mut out = Vec::new();
    while let Some(batch) = stream.try_next().await.map_err(lance_err("reading search results"))? {
        out.extend(batch_to_results(&batch)?);
    }
    Ok(out)
}

fn records_to_batch(records: &[IndexRecord], dim: i32) -> Result<RecordBatch> {
    let mut ids = Vec::with_capacity(records.len());
    let mut seqs = Vec::with_capacity(records.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(records.len());
    for r in records {
        if r.vector.len() != dim as usize {
            return Err(Error::embedding(
                EmbeddingFailure::DimensionMismatch,
                format!("record {}#{} has {} components, store expects {dim}", r.chunk.parent_document_id, r.chunk.sequence_index, r.vector.len()),
            ));
        }
        ids.push(format!("{}#{}", r.chunk.parent_document_id, r.chunk.sequence_index));
        seqs.push(i32::try_from(r.chunk.sequence_index).map_err(|_| Error::persistence("sequence index overflows i32"))?);
        vectors.push(Some(r.vector.iter().copied().map(Some).collect()));
    }
    RecordBatch::try_new(
        chunk_schema(dim),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(utf8(records, |r| r.chunk.parent_document_id.as_str())),
            Arc::new(Int32Array::from(seqs)),
            Arc::new(utf8(records, |r| r.chunk.text.as_str())),
            Arc::new(utf8(records, |r| r.metadata.source.as_str())),
            Arc::new(utf8(records, |r| r.metadata.filename.as_str())),
            Arc::new(utf8(records, |r| r.metadata.file_type.as_str())),
            Arc::new(StringArray::from(records.iter().map(|r| r.metadata.section.as_deref()).collect::<Vec<_>>())),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim)),
        ],
    )
    .map_err(lance_err("building record batch"))
}

fn utf8(records: &[IndexRecord], f: impl Fn(&IndexRecord) -> &str) -> StringArray {
    StringArray::from(records.iter().map(f).collect::<Vec<_>>())
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::persistence(format!("column {name} missing or not utf8")))
}

fn batch_to_results(batch: &RecordBatch) -> Result<Vec<QueryResult>> {
    let doc_ids = string_column(batch, "doc_id")?;
    let contents = string_column(batch, "content")?;
    let sources = string_column(batch, "source")?;
    let filenames = string_column(batch, "filename")?;
    let file_types = string_column(batch, "file_type")?;
    let sections = string_column(batch, "section")?;
    let seqs = batch
        .column_by_name("seq")
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| Error::persistence("column seq missing or not int32"))?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| Error::persistence("search results carry no _distance column"))?;

    Ok((0..batch.num_rows())
        .map(|i| QueryResult {
            content: contents.value(i).to_string(),
            metadata: RecordMetadata {
                source: sources.value(i).to_string(),
                filename: filenames.value(i).to_string(),
                file_type: file_types.value(i).to_string(),
                section: sections.is_valid(i).then(|| sections.value(i).to_string()),
            },
            score: distances.value(i),
            parent_document_id: doc_ids.value(i).to_string(),
            sequence_index: usize::try_from(seqs.value(i)).unwrap_or_default(),
        })
        .collect())
}
