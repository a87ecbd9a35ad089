//! Completion marker and live-generation pointer.
//!
//! A generation directory is complete once `manifest.json` exists in it. The
//! store directory's `ACTIVE` file names the live generation. Both are written
//! through a temp file and renamed into place, so readers see the old content
//! or the new content and nothing in between.

use std::fs;
use std::io::Write;
use std::path::Path;

use propdb_core::error::{Error, Result};
use propdb_core::types::StoreStats;
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ACTIVE_FILE: &str = "ACTIVE";

/// What a generation holds and what it was built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationManifest {
    pub store_id: String,
    pub generation: String,
    pub corpus_dir: String,
    pub table: String,
    pub record_count: usize,
    pub embedding_model: String,
    pub dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub created_at: String,
}

impl GenerationManifest {
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            record_count: self.record_count,
            store_id: self.store_id.clone(),
            embedding_model: self.embedding_model.clone(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

pub fn write_manifest(generation_dir: &Path, manifest: &GenerationManifest) -> Result<()> {
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| Error::persistence(format!("encoding manifest: {e}")))?;
    write_atomic(&generation_dir.join(MANIFEST_FILE), &json)
}

/// `Ok(None)` when the generation never completed.
pub fn read_manifest(generation_dir: &Path) -> Result<Option<GenerationManifest>> {
    let path = generation_dir.join(MANIFEST_FILE);
    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io("reading", &path, &e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::persistence(format!("corrupt manifest {}: {e}", path.display())))
}

pub fn read_active(store_dir: &Path) -> Result<Option<String>> {
    let path = store_dir.join(ACTIVE_FILE);
    match fs::read_to_string(&path) {
        Ok(s) => {
            let name = s.trim();
            if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
                return Err(Error::persistence(format!("corrupt pointer {}: {s:?}", path.display())));
            }
            Ok(Some(name.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io("reading", &path, &e)),
    }
}

/// Flips the live generation of `store_dir` to `generation`.
pub fn write_active(store_dir: &Path, generation: &str) -> Result<()> {
    write_atomic(&store_dir.join(ACTIVE_FILE), generation.as_bytes())
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| Error::persistence(format!("{} has no parent", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io("creating temp file in", dir, &e))?;
    tmp.write_all(contents).map_err(|e| Error::io("writing", tmp.path(), &e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io("syncing", tmp.path(), &e))?;
    tmp.persist(path).map_err(|e| Error::io("replacing", path, &e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> GenerationManifest {
        GenerationManifest {
            store_id: "abc".into(),
            generation: "gen-1".into(),
            corpus_dir: "/corpus".into(),
            table: "property_chunks".into(),
            record_count: 3,
            embedding_model: "hash:xx64:d8".into(),
            dimension: 8,
            chunk_size: 1000,
            chunk_overlap: 200,
            created_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn manifest_is_absent_until_written() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read_manifest(tmp.path()).unwrap(), None);
        write_manifest(tmp.path(), &manifest()).unwrap();
        assert_eq!(read_manifest(tmp.path()).unwrap(), Some(manifest()));
    }

    #[test]
    fn garbage_manifest_is_a_persistence_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(MANIFEST_FILE), "{not json").unwrap();
        assert!(read_manifest(tmp.path()).unwrap_err().is_persistence());
    }

    #[test]
    fn pointer_flips_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read_active(tmp.path()).unwrap(), None);
        write_active(tmp.path(), "gen-1").unwrap();
        write_active(tmp.path(), "gen-2").unwrap();
        assert_eq!(read_active(tmp.path()).unwrap().as_deref(), Some("gen-2"));
    }

    #[test]
    fn pointer_outside_store_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(ACTIVE_FILE), "../elsewhere").unwrap();
        assert!(read_active(tmp.path()).unwrap_err().is_persistence());
    }
}
