//! propdb-vector
//!
//! LanceDB-backed generational store for embedded property chunks, plus an
//! in-memory fallback with the same query semantics.

pub mod manifest;
pub mod memory;
pub mod schema;
pub mod store;
pub mod table;

pub use manifest::GenerationManifest;
pub use store::{BuildInfo, StagedGeneration, StoreHandle, VectorStore};
