//! Embedding providers behind `propdb_core::traits::Embedder`.

use std::sync::Arc;

use propdb_core::config::{EmbeddingSettings, ProviderKind};
use propdb_core::error::{EmbeddingFailure, Error, Result};
use propdb_core::traits::Embedder;
use tracing::info;

mod bge_m3;
mod device;
mod hash;
mod mistral;
mod pool;
mod tokenize;

pub use bge_m3::BgeM3Embedder;
pub use device::select_device;
pub use hash::HashEmbedder;
pub use mistral::MistralEmbedder;
pub use pool::masked_mean_l2;
pub use tokenize::tokenize_batch;

/// True when `APP_USE_FAKE_EMBEDDINGS` is `1` or `true`.
pub fn fake_embeddings_forced() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Builds the configured provider.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let provider = if fake_embeddings_forced() { ProviderKind::Hash } else { settings.provider };
    match provider {
        ProviderKind::Hash => {
            info!(dim = settings.dimension, "using hash embedder");
            Ok(Arc::new(HashEmbedder::new(settings.dimension)))
        }
        ProviderKind::Mistral => {
            info!(model = %settings.model, "using Mistral embeddings");
            Ok(Arc::new(MistralEmbedder::from_settings(settings)?))
        }
        ProviderKind::Local => {
            let model = BgeM3Embedder::new(None)
                .map_err(|e| Error::embedding(EmbeddingFailure::Model, format!("{e:#}")))?;
            Ok(Arc::new(model))
        }
    }
}
