//! Generational, crash-safe vector store.
//!
//! ```text
//! <root>/<store_id>/ACTIVE                          name of the live generation
//! <root>/<store_id>/gen-<millis>-<seq>/lance/       LanceDB data
//! <root>/<store_id>/gen-<millis>-<seq>/manifest.json completion marker
//! ```
//!
//! A build writes a fresh generation directory, marks it complete, then flips
//! `ACTIVE`. Until the flip, readers keep loading the previous generation;
//! an interrupted build leaves only an unreferenced directory for the next
//! [`VectorStore::sweep`]. Every [`StoreHandle`] leases its generation
//! directory, and sweeping never removes a leased one.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Utc;
use lancedb::Table;
use propdb_core::error::{EmbeddingFailure, Error, Result};
use propdb_core::types::{rank_results, IndexRecord, QueryResult, StoreStats};
use tracing::{debug, info, warn};

use crate::manifest::{read_active, read_manifest, write_active, write_manifest, GenerationManifest, MANIFEST_FILE};
use crate::memory::MemoryStore;
use crate::table::{count_rows, create_table, nearest, open_db, open_table};

const GENERATION_PREFIX: &str = "gen-";
const LANCE_DIR: &str = "lance";
/// Candidates fetched per requested result before the final re-rank.
const OVERSAMPLE: usize = 10;

static GENERATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// What a generation was built from and with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub corpus_dir: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl BuildInfo {
    fn manifest(&self, store_id: &str, generation: &str, table: &str, record_count: usize) -> GenerationManifest {
        GenerationManifest {
            store_id: store_id.to_string(),
            generation: generation.to_string(),
            corpus_dir: self.corpus_dir.clone(),
            table: table.to_string(),
            record_count,
            embedding_model: self.embedding_model.clone(),
            dimension: self.dimension,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Token held by every handle onto a generation directory.
#[derive(Debug)]
struct Lease;

/// Generation directories with live handles in this process.
#[derive(Debug, Clone, Default)]
struct Leases(Arc<Mutex<HashMap<PathBuf, Weak<Lease>>>>);

impl Leases {
    fn acquire(&self, dir: &Path) -> Arc<Lease> {
        let mut held = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        held.retain(|_, lease| lease.strong_count() > 0);
        if let Some(lease) = held.get(dir).and_then(Weak::upgrade) {
            return lease;
        }
        let lease = Arc::new(Lease);
        held.insert(dir.to_path_buf(), Arc::downgrade(&lease));
        lease
    }

    fn is_held(&self, dir: &Path) -> bool {
        let held = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        held.get(dir).is_some_and(|lease| lease.strong_count() > 0)
    }
}

#[derive(Debug, Clone)]
pub struct VectorStore {
    root: PathBuf,
    table: String,
    retain: usize,
    leases: Leases,
}

impl VectorStore {
    /// `retain` counts the live generation; values below 1 are raised to 1.
    pub fn new(root: impl Into<PathBuf>, table: impl Into<String>, retain: usize) -> Self {
        Self { root: root.into(), table: table.into(), retain: retain.max(1), leases: Leases::default() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stable id for a corpus location: a hash of its resolved absolute path.
    pub fn store_id_for(corpus_dir: &Path) -> String {
        let resolved = fs::canonicalize(corpus_dir).unwrap_or_else(|_| {
            if corpus_dir.is_absolute() {
                corpus_dir.to_path_buf()
            } else {
                std::env::current_dir().map_or_else(|_| corpus_dir.to_path_buf(), |cwd| cwd.join(corpus_dir))
            }
        });
        blake3::hash(resolved.to_string_lossy().as_bytes()).to_hex()[..16].to_string()
    }

    pub fn store_dir(&self, store_id: &str) -> PathBuf {
        self.root.join(store_id)
    }

    /// True when a live generation with a completion marker exists.
    pub fn exists(&self, store_id: &str) -> bool {
        let dir = self.store_dir(store_id);
        match read_active(&dir) {
            Ok(Some(generation)) => dir.join(generation).join(MANIFEST_FILE).is_file(),
            _ => false,
        }
    }

    /// Attaches to the live generation.
    pub async fn load(&self, store_id: &str) -> Result<StoreHandle> {
        let dir = self.store_dir(store_id);
        let generation = read_active(&dir)?
            .ok_or_else(|| Error::persistence(format!("no live generation under {}", dir.display())))?;
        let generation_dir = dir.join(&generation);
        let manifest = read_manifest(&generation_dir)?
            .ok_or_else(|| Error::persistence(format!("generation {generation} has no completion marker")))?;
        if manifest.store_id != store_id || manifest.generation != generation {
            return Err(Error::persistence(format!(
                "manifest of {} describes {}/{}",
                generation_dir.display(),
                manifest.store_id,
                manifest.generation
            )));
        }
        let conn = open_db(&generation_dir.join(LANCE_DIR)).await?;
        let table = open_table(&conn, &manifest.table).await?;
        let rows = count_rows(&table).await?;
        if rows != manifest.record_count {
            return Err(Error::persistence(format!(
                "generation {generation} holds {rows} rows, manifest records {}",
                manifest.record_count
            )));
        }
        info!(store_id, generation = %generation, records = rows, "loaded vector store");
        let lease = self.leases.acquire(&generation_dir);
        Ok(StoreHandle::lance(manifest, table, generation_dir, lease))
    }

    /// Writes `records` into a new generation that readers cannot see yet.
    pub async fn stage(&self, records: &[IndexRecord], store_id: &str, info: &BuildInfo) -> Result<StagedGeneration> {
        let (generation, dir) = self.create_generation_dir(store_id)?;
        debug!(store_id, generation = %generation, records = records.len(), "staging generation");
        let mut staged = StagedGeneration {
            store: self.clone(),
            manifest: info.manifest(store_id, &generation, &self.table, records.len()),
            dir,
            table: None,
            committed: false,
        };
        let conn = open_db(&staged.dir.join(LANCE_DIR)).await?;
        let table = create_table(&conn, &self.table, records, info.dimension).await?;
        let rows = count_rows(&table).await?;
        if rows != records.len() {
            return Err(Error::persistence(format!("wrote {} records, table holds {rows}", records.len())));
        }
        write_manifest(&staged.dir, &staged.manifest)?;
        staged.table = Some(table);
        Ok(staged)
    }

    /// Stage, mark complete, then swap in as the live generation. Older
    /// generations stay on disk until [`sweep`](Self::sweep).
    pub async fn build_from(&self, records: &[IndexRecord], store_id: &str, info: &BuildInfo) -> Result<StoreHandle> {
        self.stage(records, store_id, info).await?.commit().await
    }

    /// Copies a complete generation staged elsewhere (typically a temp
    /// directory) into this store and swaps it in.
    pub async fn adopt(&self, staged: &StagedGeneration) -> Result<StoreHandle> {
        let store_id = staged.manifest.store_id.clone();
        let (generation, dir) = self.create_generation_dir(&store_id)?;
        let mut copy = StagedGeneration {
            store: self.clone(),
            manifest: GenerationManifest { generation, ..staged.manifest.clone() },
            dir,
            table: None,
            committed: false,
        };
        copy_tree(&staged.dir, &copy.dir)?;
        let conn = open_db(&copy.dir.join(LANCE_DIR)).await?;
        let table = open_table(&conn, &copy.manifest.table).await?;
        let rows = count_rows(&table).await?;
        if rows != copy.manifest.record_count {
            return Err(Error::persistence(format!(
                "copied generation holds {rows} rows, expected {}",
                copy.manifest.record_count
            )));
        }
        write_manifest(&copy.dir, &copy.manifest)?;
        copy.table = Some(table);
        info!(store_id = %store_id, from = %staged.dir.display(), "adopting staged generation");
        copy.commit().await
    }

    /// Removes generations older than the live one: incomplete ones always,
    /// complete ones beyond the retention count. Directories still leased by a
    /// handle are skipped until a later sweep. Returns how many directories
    /// were removed.
    pub fn sweep(&self, store_id: &str) -> Result<usize> {
        let dir = self.store_dir(store_id);
        let Some(active) = read_active(&dir)? else { return Ok(0) };
        let entries = fs::read_dir(&dir).map_err(|e| Error::io("listing", &dir, &e))?;
        let mut complete = Vec::new();
        let mut doomed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("listing", &dir, &e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(GENERATION_PREFIX) || name >= active || !entry.path().is_dir() {
                continue;
            }
            match read_manifest(&entry.path()) {
                Ok(Some(_)) => complete.push(name),
                _ => doomed.push(name),
            }
        }
        complete.sort();
        let excess = complete.len().saturating_sub(self.retain - 1);
        doomed.extend(complete.into_iter().take(excess));

        let mut removed = 0;
        for name in doomed {
            let path = dir.join(&name);
            if self.leases.is_held(&path) {
                debug!(generation = %name, "generation still in use, keeping it");
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!(generation = %name, "removed old generation");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove old generation"),
            }
        }
        Ok(removed)
    }

    fn create_generation_dir(&self, store_id: &str) -> Result<(String, PathBuf)> {
        let store_dir = self.store_dir(store_id);
        fs::create_dir_all(&store_dir).map_err(|e| Error::io("creating", &store_dir, &e))?;
        let millis = Utc::now().timestamp_millis();
        loop {
            let seq = GENERATION_SEQ.fetch_add(1, Ordering::Relaxed);
            let name = format!("{GENERATION_PREFIX}{millis:013}-{seq:06}");
            let dir = store_dir.join(&name);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((name, dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::io("creating", &dir, &e)),
            }
        }
    }
}

/// A complete generation not yet visible to readers. Dropping it without
/// [`commit`](Self::commit) deletes its directory.
pub struct StagedGeneration {
    store: VectorStore,
    manifest: GenerationManifest,
    dir: PathBuf,
    table: Option<Table>,
    committed: bool,
}

impl StagedGeneration {
    pub fn manifest(&self) -> &GenerationManifest {
        &self.manifest
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Flips `ACTIVE` to this generation.
    pub async fn commit(mut self) -> Result<StoreHandle> {
        let store_dir = self.store.store_dir(&self.manifest.store_id);
        let table = match self.table.take() {
            Some(t) => t,
            None => open_table(&open_db(&self.dir.join(LANCE_DIR)).await?, &self.manifest.table).await?,
        };
        write_active(&store_dir, &self.manifest.generation)?;
        self.committed = true;
        info!(
            store_id = %self.manifest.store_id,
            generation = %self.manifest.generation,
            records = self.manifest.record_count,
            "swapped in new generation"
        );
        let lease = self.store.leases.acquire(&self.dir);
        Ok(StoreHandle::lance(self.manifest.clone(), table, self.dir.clone(), lease))
    }
}

impl Drop for StagedGeneration {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(dir = %self.dir.display(), "discarded staged generation"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "could not discard staged generation"),
        }
    }
}

#[derive(Clone)]
enum Backend {
    Lance { table: Table, dir: PathBuf, _lease: Arc<Lease> },
    Memory(Arc<MemoryStore>),
}

/// Read-only view of one generation. Cheap to clone.
#[derive(Clone)]
pub struct StoreHandle {
    manifest: GenerationManifest,
    backend: Backend,
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("manifest", &self.manifest)
            .field("durable", &self.is_durable())
            .finish()
    }
}

impl StoreHandle {
    fn lance(manifest: GenerationManifest, table: Table, dir: PathBuf, lease: Arc<Lease>) -> Self {
        Self { manifest, backend: Backend::Lance { table, dir, _lease: lease } }
    }

    /// A process-lifetime store over already embedded records.
    pub fn in_memory(records: Vec<IndexRecord>, store_id: &str, info: &BuildInfo) -> Self {
        let manifest = info.manifest(store_id, "memory", "memory", records.len());
        Self { manifest, backend: Backend::Memory(Arc::new(MemoryStore::new(records))) }
    }

    pub fn manifest(&self) -> &GenerationManifest {
        &self.manifest
    }

    pub fn record_count(&self) -> usize {
        self.manifest.record_count
    }

    pub fn is_durable(&self) -> bool {
        matches!(self.backend, Backend::Lance { .. })
    }

    /// Generation directory on disk, if any.
    pub fn location(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Lance { dir, .. } => Some(dir),
            Backend::Memory(_) => None,
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.manifest.stats()
    }

    /// Errors when the generation was built by a different model.
    pub fn ensure_compatible(&self, model_id: &str, dim: usize) -> Result<()> {
        if self.manifest.embedding_model != model_id || self.manifest.dimension != dim {
            return Err(Error::persistence(format!(
                "store built with {} (d={}), embedder is {model_id} (d={dim})",
                self.manifest.embedding_model, self.manifest.dimension
            )));
        }
        Ok(())
    }

    /// At most `k` nearest records by cosine distance, in rank order.
    /// `k` is clamped to `[1, record_count]`.
    pub async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryResult>> {
        let count = self.manifest.record_count;
        if count == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.manifest.dimension {
            return Err(Error::embedding(
                EmbeddingFailure::DimensionMismatch,
                format!("query has {} components, store expects {}", vector.len(), self.manifest.dimension),
            ));
        }
        let k = k.clamp(1, count);
        let mut results = match &self.backend {
            Backend::Lance { table, .. } => nearest(table, vector, k.saturating_mul(OVERSAMPLE).min(count)).await?,
            Backend::Memory(store) => store.scan(vector),
        };
        rank_results(&mut results, k);
        debug!(k, returned = results.len(), "store query");
        Ok(results)
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(|e| Error::persistence(format!("walking {}: {e}", src.display())))?;
        let Ok(rel) = entry.path().strip_prefix(src) else { continue };
        if rel.as_os_str().is_empty() || rel == Path::new(MANIFEST_FILE) {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io("creating", &target, &e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| Error::io("copying to", &target, &e))?;
        }
    }
    Ok(())
}
