//! `PropertyIndex`: the one object callers hold.
//!
//! Readers clone the current [`Generation`] out of an `RwLock` and query it
//! without further locking. Builds are serialized by an async mutex and run
//! entirely outside the `RwLock`; publishing a finished build is a single
//! pointer replace.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use propdb_core::chunker::ChunkingConfig;
use propdb_core::config::Settings;
use propdb_core::data_processor::DataProcessor;
use propdb_core::error::{Error, Result};
use propdb_core::traits::Embedder;
use propdb_core::types::{QueryResult, StoreStats};
use propdb_vector::VectorStore;
use serde::Serialize;
use tracing::{info, warn};

use crate::context::ContextAssembler;
use crate::lifecycle::{BuildOutcome, Builder, Generation, LifecycleState};
use crate::retrieval::RetrievalEngine;

const PHASE_IDLE: u8 = 0;
const PHASE_LOADING: u8 = 1;
const PHASE_BUILDING: u8 = 2;

/// Outcome of a build request. Failures are reported, never raised.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub success: bool,
    pub state: LifecycleState,
    pub generation: u64,
    pub record_count: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// True when this caller waited on another caller's build and got its result.
    pub shared: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub state: LifecycleState,
    pub generation: u64,
    pub durable: bool,
    pub store_id: String,
    pub corpus_dir: PathBuf,
    pub index_root: PathBuf,
    pub store: Option<StoreStats>,
    pub last_error: Option<String>,
}

/// Diagnostics for one question.
#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    pub query: String,
    pub relevant_chunks: usize,
    pub context: String,
    pub top_result: Option<QueryResult>,
    pub all_results: Vec<QueryResult>,
}

pub struct PropertyIndex {
    builder: Builder,
    retrieval: RetrievalEngine,
    assembler: ContextAssembler,
    default_k: usize,
    context_items: usize,
    fallback_query: String,
    live: RwLock<Arc<Generation>>,
    build_lock: tokio::sync::Mutex<()>,
    phase: AtomicU8,
    builds_started: AtomicU64,
    builds_finished: AtomicU64,
    last_report: Mutex<Option<RefreshReport>>,
}

impl PropertyIndex {
    /// Validates `settings` and wires the components. Nothing is read or
    /// built until [`start`](Self::start). Relative paths resolve against `base_dir`.
    pub fn new(settings: &Settings, base_dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        settings.validate()?;
        let chunking = ChunkingConfig::new(settings.index.chunk_size, settings.index.chunk_overlap)?;
        let corpus_dir = settings.corpus_dir(base_dir);
        let index_root = settings.index_root(base_dir);
        let builder = Builder {
            processor: DataProcessor::new(chunking, settings.corpus.extensions.clone()),
            store: VectorStore::new(&index_root, settings.index.table.clone(), settings.index.retain_generations),
            embedder: Arc::clone(&embedder),
            store_id: VectorStore::store_id_for(&corpus_dir),
            corpus_dir,
            table: settings.index.table.clone(),
            batch_size: settings.embedding.batch_size,
        };
        Ok(Self {
            builder,
            retrieval: RetrievalEngine::new(embedder),
            assembler: ContextAssembler::new(settings.retrieval.context_items, settings.retrieval.context_max_chars),
            default_k: settings.retrieval.default_k,
            context_items: settings.retrieval.context_items,
            fallback_query: settings.retrieval.fallback_query.clone(),
            live: RwLock::new(Arc::new(Generation::uninitialized())),
            build_lock: tokio::sync::Mutex::new(()),
            phase: AtomicU8::new(PHASE_IDLE),
            builds_started: AtomicU64::new(0),
            builds_finished: AtomicU64::new(0),
            last_report: Mutex::new(None),
        })
    }

    /// [`new`](Self::new) with the configured embedding provider, then [`start`](Self::start).
    pub async fn open(settings: &Settings, base_dir: &Path) -> Result<Arc<Self>> {
        let embedding = settings.embedding.clone();
        let embedder = tokio::task::spawn_blocking(move || propdb_embed::get_default_embedder(&embedding))
            .await
            .map_err(|e| Error::config(format!("embedding provider setup failed: {e}")))??;
        let index = Arc::new(Self::new(settings, base_dir, embedder)?);
        index.start().await;
        Ok(index)
    }

    /// Loads the existing store or builds one. Later calls report the
    /// current state without doing anything.
    pub async fn start(&self) -> RefreshReport {
        self.serialized(true).await
    }

    /// Rebuilds from the corpus and swaps the result in. A caller arriving
    /// while another build runs waits for it and receives its report.
    pub async fn refresh(&self) -> RefreshReport {
        self.serialized(false).await
    }

    pub fn state(&self) -> LifecycleState {
        match self.phase.load(Ordering::Acquire) {
            PHASE_LOADING => LifecycleState::LoadingExisting,
            PHASE_BUILDING => LifecycleState::BuildingNew,
            _ => self.current().state,
        }
    }

    pub async fn query_property_info(&self, query: &str, k: usize) -> Vec<QueryResult> {
        let generation = self.current();
        self.retrieval.retrieve(generation.handle.as_ref(), query, k).await
    }

    /// Context block for `query`. With no query, or no hits, the broad
    /// fallback query is used instead. Empty only when no index is servable.
    pub async fn format_context(&self, query: Option<&str>) -> String {
        let mut results = match query {
            Some(q) if !q.trim().is_empty() => self.query_property_info(q, self.default_k).await,
            _ => Vec::new(),
        };
        if results.is_empty() {
            if query.is_some() {
                warn!("no relevant context found for query, using general context");
            }
            results = self.query_property_info(&self.fallback_query, self.context_items).await;
        }
        self.assembler.assemble(&results)
    }

    /// Overview block for "send property summary" flows.
    pub async fn summary(&self) -> String {
        self.format_context(None).await
    }

    pub async fn insights(&self, query: &str) -> Insights {
        let all_results = self.query_property_info(query, self.default_k).await;
        let context = self.format_context(Some(query)).await;
        Insights {
            query: query.to_string(),
            relevant_chunks: all_results.len(),
            context,
            top_result: all_results.first().cloned(),
            all_results,
        }
    }

    pub fn stats(&self) -> IndexStats {
        let generation = self.current();
        IndexStats {
            state: self.state(),
            generation: generation.number,
            durable: generation.handle.as_ref().is_some_and(|h| h.is_durable()),
            store_id: self.builder.store_id.clone(),
            corpus_dir: self.builder.corpus_dir.clone(),
            index_root: self.builder.store.root().to_path_buf(),
            store: generation.handle.as_ref().map(|h| h.stats()),
            last_error: generation.last_error.clone(),
        }
    }

    pub fn current(&self) -> Arc<Generation> {
        Arc::clone(&self.live.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, state: LifecycleState, handle: Option<propdb_vector::StoreHandle>, last_error: Option<String>) -> Arc<Generation> {
        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(Generation { number: live.number + 1, state, handle, last_error });
        *live = Arc::clone(&next);
        info!(generation = next.number, state = %state, "published index generation");
        next
    }

    async fn serialized(&self, initial: bool) -> RefreshReport {
        let started = self.builds_started.load(Ordering::Acquire);
        let in_flight = started > self.builds_finished.load(Ordering::Acquire);
        let _guard = self.build_lock.lock().await;

        if in_flight && self.builds_finished.load(Ordering::Acquire) >= started {
            let shared = self.last_report.lock().unwrap_or_else(PoisonError::into_inner).clone();
            if let Some(report) = shared {
                return RefreshReport { shared: true, ..report };
            }
        }
        if initial && self.current().state != LifecycleState::Uninitialized {
            return self.report_current(true, None, Instant::now());
        }

        *self.last_report.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.builds_started.fetch_add(1, Ordering::AcqRel);
        let _finished = BuildGuard(self);
        let report = self.run_build(initial).await;
        *self.last_report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        report
    }

    async fn run_build(&self, initial: bool) -> RefreshReport {
        let started_at = Instant::now();
        if initial && self.builder.has_existing() {
            self.phase.store(PHASE_LOADING, Ordering::Release);
            match self.builder.load_existing().await {
                Ok(handle) => {
                    self.publish(LifecycleState::Ready, Some(handle), None);
                    self.builder.sweep();
                    return self.report_current(true, None, started_at);
                }
                Err(e) => warn!(error = %e, "existing index unusable, rebuilding"),
            }
        }

        self.phase.store(PHASE_BUILDING, Ordering::Release);
        info!(corpus = %self.builder.corpus_dir.display(), "building index");
        match self.builder.build().await {
            Ok(BuildOutcome::Durable(handle)) => {
                self.publish(LifecycleState::Ready, Some(handle), None);
                self.builder.sweep();
                self.report_current(true, None, started_at)
            }
            Ok(BuildOutcome::InMemory { handle, reason }) => {
                self.publish(LifecycleState::Degraded, Some(handle), Some(reason.clone()));
                self.report_current(true, Some(reason), started_at)
            }
            Err(e) => {
                let message = e.to_string();
                if self.current().handle.is_some() {
                    warn!(error = %message, "refresh failed, keeping the live generation");
                } else {
                    warn!(error = %message, "index build failed, queries return nothing until a refresh succeeds");
                    self.publish(LifecycleState::Failed, None, Some(message.clone()));
                }
                self.report_current(false, Some(message), started_at)
            }
        }
    }

    fn report_current(&self, success: bool, error: Option<String>, started_at: Instant) -> RefreshReport {
        let generation = self.current();
        RefreshReport {
            success,
            state: generation.state,
            generation: generation.number,
            record_count: generation.handle.as_ref().map_or(0, |h| h.record_count()),
            error,
            duration_ms: u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            shared: false,
        }
    }
}

/// Marks the running build finished, also when its future is dropped
/// midway. A cancelled build leaves no report to share.
struct BuildGuard<'a>(&'a PropertyIndex);

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.phase.store(PHASE_IDLE, Ordering::Release);
        self.0.builds_finished.fetch_add(1, Ordering::AcqRel);
    }
}
