//! Domain types shared by the chunker, the vector store and retrieval.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

/// Where a document came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    File,
    Synthetic,
}

/// One source file of the property corpus, read once and never modified.
///
/// - `id`: path relative to the corpus directory (stable across machines)
/// - `path`: absolute path of the source file
/// - `filename`: final path component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub path: PathBuf,
    pub filename: String,
    pub content: String,
    pub source_kind: SourceKind,
}

impl Document {
    /// Lower-cased extension, or `"text"` when the file has none.
    pub fn file_type(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map_or_else(|| "text".to_string(), str::to_ascii_lowercase)
    }
}

/// A bounded span of a document, produced by the chunker.
///
/// `sequence_index` orders chunks within their parent and is the final
/// tie-break when two results are equally distant from a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub sequence_index: usize,
    pub parent_document_id: String,
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: String,
    pub filename: String,
    pub file_type: String,
    pub section: Option<String>,
}

impl RecordMetadata {
    pub fn for_document(doc: &Document, section: Option<String>) -> Self {
        Self {
            source: doc.path.to_string_lossy().to_string(),
            filename: doc.filename.clone(),
            file_type: doc.file_type(),
            section,
        }
    }
}

/// The unit persisted in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// A ranked excerpt returned by a similarity query.
///
/// `score` is the cosine distance to the query vector: lower is closer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub content: String,
    pub metadata: RecordMetadata,
    pub score: f32,
    pub parent_document_id: String,
    pub sequence_index: usize,
}

impl QueryResult {
    /// Similarity in `[0, 1]`-ish terms, higher is better.
    pub fn relevance(&self) -> f32 {
        1.0 - self.score
    }

    /// Ascending distance, then `(parent_document_id, sequence_index)`.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.parent_document_id.cmp(&other.parent_document_id))
            .then_with(|| self.sequence_index.cmp(&other.sequence_index))
    }
}

/// Sorts results into rank order and keeps the first `k`.
pub fn rank_results(results: &mut Vec<QueryResult>, k: usize) {
    results.sort_by(QueryResult::rank_cmp);
    results.truncate(k);
}

/// Summary of a store generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub record_count: usize,
    pub store_id: String,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}
