//! Remote embeddings over the Mistral `/embeddings` HTTP API.

use std::sync::OnceLock;
use std::time::Duration;

use propdb_core::config::EmbeddingSettings;
use propdb_core::error::{EmbeddingFailure, Error, Result};
use propdb_core::traits::{check_batch, Embedder};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Blocking client; run it off the async executor. The HTTP client is
/// created on the first request and released on its own thread.
pub struct MistralEmbedder {
    client: OnceLock<Client>,
    timeout: Duration,
    endpoint: String,
    api_key: String,
    model: String,
    model_id: String,
    dim: usize,
    batch_size: usize,
}

impl MistralEmbedder {
    /// Reads the API key from the env var named by `settings.api_key_env`.
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::config(format!("{} is not set", settings.api_key_env)))?;
        Self::new(settings, api_key)
    }

    pub fn new(settings: &EmbeddingSettings, api_key: String) -> Result<Self> {
        Ok(Self {
            client: OnceLock::new(),
            timeout: Duration::from_secs(settings.timeout_secs),
            endpoint: format!("{}/embeddings", settings.base_url.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
            model_id: format!("mistral:{}", settings.model),
            dim: settings.dimension,
            batch_size: settings.batch_size.max(1),
        })
    }

    fn client(&self) -> Result<&Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::config(format!("cannot build HTTP client: {e}")))?;
        Ok(self.client.get_or_init(|| client))
    }

    fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client()?
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest { model: &self.model, input: texts })
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::embedding(status_failure(status), format!("HTTP {status}: {}", body.trim())));
        }
        let parsed: EmbeddingResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                transport_error(e)
            } else {
                Error::embedding(EmbeddingFailure::InvalidResponse, format!("malformed embeddings body: {e}"))
            }
        })?;

        let mut items = parsed.data;
        if items.iter().all(|i| i.index.is_some()) {
            items.sort_by_key(|i| i.index);
        }
        Ok(items.into_iter().map(|i| i.embedding).collect())
    }
}

impl Drop for MistralEmbedder {
    fn drop(&mut self) {
        // shutting the client down joins its runtime thread
        if let Some(client) = self.client.take() {
            std::thread::spawn(move || drop(client));
        }
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    let kind = if e.is_timeout() { EmbeddingFailure::Timeout } else { EmbeddingFailure::Network };
    Error::embedding(kind, e.to_string())
}

fn status_failure(status: StatusCode) -> EmbeddingFailure {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EmbeddingFailure::Authentication,
        StatusCode::TOO_MANY_REQUESTS => EmbeddingFailure::RateLimited,
        _ => EmbeddingFailure::Network,
    }
}

impl Embedder for MistralEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        8192
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for (n, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(batch = n, size = batch.len(), "requesting embeddings");
            let vectors = self.request(batch)?;
            check_batch(self, batch.len(), &vectors)?;
            out.extend(vectors);
        }
        Ok(out)
    }
}
