//! propdb-rag
//!
//! Retrieval over the property index: the lifecycle that loads, builds and
//! refreshes store generations, the retrieval engine, and context assembly.
//! [`PropertyIndex`] ties them together and is meant to be shared via `Arc`.

pub mod context;
pub mod index;
pub mod lifecycle;
pub mod retrieval;

pub use context::{ContextAssembler, CONTEXT_HEADER};
pub use index::{IndexStats, Insights, PropertyIndex, RefreshReport};
pub use lifecycle::{Generation, LifecycleState};
pub use retrieval::RetrievalEngine;
