//! Index lifecycle: states, published generations, and the build pipeline.
//!
//! ```text
//! Uninitialized ──exists──▶ LoadingExisting ──ok──▶ Ready
//!       │                          │corrupt
//!       └──────────────────────────┴──▶ BuildingNew ──▶ Ready | Degraded | Failed
//! Ready | Degraded | Failed ──refresh──▶ BuildingNew
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use propdb_core::data_processor::{DataProcessor, PreparedChunk};
use propdb_core::error::{EmbeddingFailure, Error, Result};
use propdb_core::traits::{check_batch, Embedder};
use propdb_core::types::IndexRecord;
use propdb_vector::{BuildInfo, StoreHandle, VectorStore};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    LoadingExisting,
    BuildingNew,
    Ready,
    Degraded,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::LoadingExisting => "loading_existing",
            Self::BuildingNew => "building_new",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What readers see: replaced wholesale, never mutated.
#[derive(Debug, Clone)]
pub struct Generation {
    pub number: u64,
    pub state: LifecycleState,
    pub handle: Option<StoreHandle>,
    pub last_error: Option<String>,
}

impl Generation {
    pub fn uninitialized() -> Self {
        Self { number: 0, state: LifecycleState::Uninitialized, handle: None, last_error: None }
    }
}

/// Result of a build that produced something servable.
pub enum BuildOutcome {
    /// Persisted and swapped in.
    Durable(StoreHandle),
    /// Persisting failed twice; records are served from memory.
    InMemory { handle: StoreHandle, reason: String },
}

/// Corpus → chunks → embeddings → store, for one corpus location.
pub struct Builder {
    pub(crate) processor: DataProcessor,
    pub(crate) store: VectorStore,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) corpus_dir: PathBuf,
    pub(crate) store_id: String,
    pub(crate) table: String,
    pub(crate) batch_size: usize,
}

impl Builder {
    fn build_info(&self) -> BuildInfo {
        let chunking = self.processor.chunking();
        BuildInfo {
            corpus_dir: self.corpus_dir.to_string_lossy().to_string(),
            embedding_model: self.embedder.model_id().to_string(),
            dimension: self.embedder.dim(),
            chunk_size: chunking.chunk_size,
            chunk_overlap: chunking.overlap,
        }
    }

    pub fn has_existing(&self) -> bool {
        self.store.exists(&self.store_id)
    }

    /// Attaches to the live generation if it was built by this embedder.
    pub async fn load_existing(&self) -> Result<StoreHandle> {
        let handle = self.store.load(&self.store_id).await?;
        handle.ensure_compatible(self.embedder.model_id(), self.embedder.dim())?;
        Ok(handle)
    }

    /// Removes generations superseded by the live one. Call after publishing
    /// so readers are already off the old handle.
    pub fn sweep(&self) {
        match self.store.sweep(&self.store_id) {
            Ok(n) if n > 0 => debug!(removed = n, "swept old generations"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "sweeping old generations failed"),
        }
    }

    /// Full rebuild from the corpus directory.
    ///
    /// Configuration and embedding errors are returned. Persistence errors are
    /// absorbed: the build is retried in a scratch directory and copied in,
    /// and failing that the records are served from memory.
    pub async fn build(&self) -> Result<BuildOutcome> {
        let processor = self.processor.clone();
        let corpus_dir = self.corpus_dir.clone();
        let corpus = tokio::task::spawn_blocking(move || processor.process_directory(&corpus_dir))
            .await
            .map_err(|e| Error::config(format!("corpus scan task failed: {e}")))??;
        let records = embed_chunks(Arc::clone(&self.embedder), corpus.chunks, self.batch_size).await?;
        let info = self.build_info();
        info!(
            store_id = %self.store_id,
            documents = corpus.documents.len(),
            records = records.len(),
            synthetic = corpus.synthetic,
            "embedded corpus"
        );

        match self.store.build_from(&records, &self.store_id, &info).await {
            Ok(handle) => Ok(BuildOutcome::Durable(handle)),
            Err(e) if e.is_persistence() => {
                warn!(error = %e, root = %self.store.root().display(), "persisting index failed, retrying via scratch directory");
                Ok(self.build_via_scratch(records, &info, e).await)
            }
            Err(e) => Err(e),
        }
    }

    async fn build_via_scratch(&self, records: Vec<IndexRecord>, info: &BuildInfo, first: Error) -> BuildOutcome {
        let attempt = async {
            let scratch_dir = tempfile::tempdir().map_err(|e| Error::persistence(format!("creating scratch directory: {e}")))?;
            let scratch = VectorStore::new(scratch_dir.path(), self.table.clone(), 1);
            let staged = scratch.stage(&records, &self.store_id, info).await?;
            self.store.adopt(&staged).await
        };
        match attempt.await {
            Ok(handle) => {
                info!(store_id = %self.store_id, "index persisted from scratch directory");
                BuildOutcome::Durable(handle)
            }
            Err(second) => {
                let reason = format!("{first}; scratch copy: {second}");
                warn!(reason = %reason, "serving index from memory until a refresh succeeds");
                let handle = StoreHandle::in_memory(records, &self.store_id, info);
                BuildOutcome::InMemory { handle, reason }
            }
        }
    }
}

/// Embeds chunk texts in batches on the blocking pool.
async fn embed_chunks(embedder: Arc<dyn Embedder>, prepared: Vec<PreparedChunk>, batch_size: usize) -> Result<Vec<IndexRecord>> {
    tokio::task::spawn_blocking(move || {
        let mut records = Vec::with_capacity(prepared.len());
        for batch in prepared.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.chunk.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts)?;
            check_batch(embedder.as_ref(), texts.len(), &vectors)?;
            records.extend(batch.iter().cloned().zip(vectors).map(|(chunk, vector)| chunk.into_record(vector)));
        }
        Ok(records)
    })
    .await
    .map_err(|e| Error::embedding(EmbeddingFailure::Model, format!("embedding task failed: {e}")))?
}
