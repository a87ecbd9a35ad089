use std::sync::Arc;

use propdb_core::error::{EmbeddingFailure, Error, Result};
use propdb_core::traits::Embedder;
use propdb_core::types::QueryResult;
use propdb_vector::StoreHandle;
use tracing::{debug, warn};

/// Embeds a question and searches whichever generation is live.
#[derive(Clone)]
pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
}

impl RetrievalEngine {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Up to `k` results. Never fails: a missing store, a blank question or
    /// a provider error all produce an empty list and a log line.
    pub async fn retrieve(&self, handle: Option<&StoreHandle>, query_text: &str, k: usize) -> Vec<QueryResult> {
        let Some(handle) = handle else {
            warn!("no usable vector store, returning no results");
            return Vec::new();
        };
        if query_text.trim().is_empty() || handle.record_count() == 0 {
            return Vec::new();
        }
        let vector = match self.embed_query(query_text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed");
                return Vec::new();
            }
        };
        match handle.query(&vector, k).await {
            Ok(results) => {
                debug!(query = query_text, k, hits = results.len(), top = ?results.first().map(|r| r.score), "retrieved");
                results
            }
            Err(e) => {
                warn!(error = %e, "vector query failed");
                Vec::new()
            }
        }
    }

    /// Runs the (possibly blocking) provider off the async executor.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| Error::embedding(EmbeddingFailure::Model, format!("embedding task failed: {e}")))?
    }
}
