//! propdb-core
//!
//! Shared types, the `Embedder` capability, typed errors, settings and the
//! corpus → chunk pipeline used by the vector store and retrieval crates.

pub mod chunker;
pub mod config;
pub mod data_processor;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{EmbeddingFailure, Error, Result};
