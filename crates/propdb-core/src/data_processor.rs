//! Corpus collection: directory scan → documents → chunks with metadata.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::chunker::{split_with, ChunkingConfig};
use crate::error::{Error, Result};
use crate::types::{Chunk, Document, IndexRecord, RecordMetadata, SourceKind};

/// Id of the document synthesized for an empty corpus.
pub const DEFAULT_DOCUMENT_ID: &str = "default-property-info";

const DEFAULT_PROPERTY_INFO: &str = "\
PROPERTY NAME:
Your Property
LOCATION:
Your City, State
CHECK IN & CHECK OUT:
Check-in: 3:00 PM, Check-out: 11:00 AM
AMENITIES:
WiFi, Kitchen, Parking, Bathrooms, Bedrooms
HOUSE RULES:
No smoking, No pets, Quiet hours 10 PM-8 AM
WHAT'S INCLUDED:
Towels, linens, coffee, tea
NEARBY ATTRACTIONS:
Restaurants, shopping, attractions
CANCELLATION POLICY:
Flexible cancellation policy
";

/// A chunk ready for embedding.
#[derive(Debug, Clone)]
pub struct PreparedChunk {
    pub chunk: Chunk,
    pub metadata: RecordMetadata,
}

impl PreparedChunk {
    pub fn into_record(self, vector: Vec<f32>) -> IndexRecord {
        IndexRecord { chunk: self.chunk, vector, metadata: self.metadata }
    }
}

/// Everything a build needs from one corpus snapshot.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub documents: Vec<Document>,
    pub chunks: Vec<PreparedChunk>,
    pub synthetic: bool,
}

#[derive(Debug, Clone)]
pub struct DataProcessor {
    chunking: ChunkingConfig,
    extensions: Vec<String>,
}

impl Default for DataProcessor {
    fn default() -> Self {
        Self { chunking: ChunkingConfig::default(), extensions: vec!["txt".to_string(), "md".to_string()] }
    }
}

impl DataProcessor {
    pub fn new(chunking: ChunkingConfig, extensions: Vec<String>) -> Self {
        let extensions = extensions.into_iter().map(|e| e.trim_start_matches('.').to_ascii_lowercase()).collect();
        Self { chunking, extensions }
    }

    pub fn chunking(&self) -> ChunkingConfig {
        self.chunking
    }

    /// Reads and chunks the corpus, substituting the default document when
    /// the directory holds no usable files.
    pub fn process_directory(&self, data_dir: &Path) -> Result<Corpus> {
        let (documents, synthetic) = match self.collect_documents(data_dir) {
            Ok(docs) => (docs, false),
            Err(Error::EmptyCorpus(dir)) => {
                warn!(dir = %dir.display(), "corpus is empty, indexing default property information");
                (vec![default_document(data_dir)], true)
            }
            Err(e) => return Err(e),
        };
        let chunks = self.chunk_documents(&documents);
        info!(documents = documents.len(), chunks = chunks.len(), synthetic, "processed corpus");
        Ok(Corpus { documents, chunks, synthetic })
    }

    /// One document per readable, non-empty file with an accepted extension.
    ///
    /// A missing directory is created; failing that is a configuration error.
    /// Unreadable files are skipped with a warning.
    pub fn collect_documents(&self, data_dir: &Path) -> Result<Vec<Document>> {
        if !data_dir.is_dir() {
            fs::create_dir_all(data_dir).map_err(|e| {
                Error::config(format!("corpus directory {} is missing and cannot be created: {e}", data_dir.display()))
            })?;
            info!(dir = %data_dir.display(), "created missing corpus directory");
        }
        let files = self.list_files(data_dir);
        let mut documents = Vec::with_capacity(files.len());
        for (file_index, file_path) in files.iter().enumerate() {
            debug!("Processing file {}/{}: {}", file_index + 1, files.len(), file_path.display());
            let content = match read_file_content(file_path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = %file_path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            let content = content.trim();
            if content.is_empty() {
                debug!(file = %file_path.display(), "skipping empty file");
                continue;
            }
            documents.push(Document {
                id: document_id(file_path, data_dir),
                path: file_path.clone(),
                filename: file_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
                content: content.to_string(),
                source_kind: SourceKind::File,
            });
        }
        if documents.is_empty() {
            return Err(Error::EmptyCorpus(data_dir.to_path_buf()));
        }
        Ok(documents)
    }

    pub fn chunk_documents(&self, documents: &[Document]) -> Vec<PreparedChunk> {
        documents
            .iter()
            .flat_map(|doc| {
                split_with(doc, &self.chunking).into_iter().map(move |chunk| {
                    let metadata = RecordMetadata::for_document(doc, chunk.section.clone());
                    PreparedChunk { chunk, metadata }
                })
            })
            .collect()
    }

    fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|p| {
                p.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
            })
            .collect();
        files.sort();
        files
    }
}

/// The synthetic document describing generic property fields.
pub fn default_document(data_dir: &Path) -> Document {
    Document {
        id: DEFAULT_DOCUMENT_ID.to_string(),
        path: data_dir.join(format!("{DEFAULT_DOCUMENT_ID}.txt")),
        filename: format!("{DEFAULT_DOCUMENT_ID}.txt"),
        content: DEFAULT_PROPERTY_INFO.to_string(),
        source_kind: SourceKind::Synthetic,
    }
}

fn read_file_content(file_path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(file_path)?;
    Ok(match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).to_string(),
    })
}

fn document_id(file_path: &Path, data_dir: &Path) -> String {
    let relative = file_path.strip_prefix(data_dir).unwrap_or(file_path);
    relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
}
