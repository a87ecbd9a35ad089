use crate::error::{EmbeddingFailure, Error, Result};

/// Maps text to fixed-length vectors.
///
/// Implementations must be deterministic for a fixed `model_id` and must
/// preserve input order in `embed_batch`. Calls may block (network or model
/// inference); async callers run them on the blocking pool.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `hash:xx64:d1024`).
    fn model_id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// Maximum input length the provider accepts, in tokens.
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| Error::embedding(EmbeddingFailure::InvalidResponse, "provider returned no vector"))
    }
}

/// Checks a provider response against the request: one vector per input,
/// each of the provider's dimension.
pub fn check_batch(embedder: &dyn Embedder, inputs: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != inputs {
        return Err(Error::embedding(
            EmbeddingFailure::InvalidResponse,
            format!("requested {inputs} embeddings, received {}", vectors.len()),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != embedder.dim()) {
        return Err(Error::embedding(
            EmbeddingFailure::DimensionMismatch,
            format!("got {} expected {}", bad.len(), embedder.dim()),
        ));
    }
    Ok(())
}
