//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates nesting, e.g. `APP_INDEX__CHUNK_SIZE`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Ok(Self { figment: Self::figment_for_env(&env_name) })
    }

    pub fn figment_for_env(env_name: &str) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment.merge(Env::prefixed("APP_").split("__"))
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    /// Extracts and validates the full typed settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::config(format!("Failed to read settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub corpus: CorpusSettings,
    pub index: IndexSettings,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSettings {
    pub dir: String,
    pub extensions: Vec<String>,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self { dir: "data".to_string(), extensions: vec!["txt".to_string(), "md".to_string()] }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub root: String,
    pub table: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retain_generations: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            root: "vector_store".to_string(),
            table: "property_chunks".to_string(),
            chunk_size: 1000,
            chunk_overlap: 200,
            retain_generations: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Hash,
    Local,
    Mistral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub dimension: usize,
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Hash,
            model: "mistral-embed".to_string(),
            dimension: 1024,
            base_url: "https://api.mistral.ai/v1".to_string(),
            api_key_env: "MISTRAL_API_KEY".to_string(),
            timeout_secs: 30,
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub default_k: usize,
    pub context_items: usize,
    pub context_max_chars: usize,
    pub fallback_query: String,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            default_k: 3,
            context_items: 2,
            context_max_chars: 2000,
            fallback_query: "property overview amenities check-in house rules".to_string(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.index.chunk_size == 0 {
            return Err(Error::config("index.chunk_size must be greater than zero"));
        }
        if self.index.chunk_overlap >= self.index.chunk_size {
            return Err(Error::config(format!(
                "index.chunk_overlap ({}) must be smaller than index.chunk_size ({})",
                self.index.chunk_overlap, self.index.chunk_size
            )));
        }
        if self.index.retain_generations == 0 {
            return Err(Error::config("index.retain_generations must keep at least the live generation"));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::config("embedding.dimension must be greater than zero"));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::config("embedding.batch_size must be greater than zero"));
        }
        if self.retrieval.default_k == 0 || self.retrieval.context_items == 0 {
            return Err(Error::config("retrieval.default_k and retrieval.context_items must be positive"));
        }
        if self.corpus.extensions.is_empty() {
            return Err(Error::config("corpus.extensions must list at least one extension"));
        }
        Ok(())
    }

    /// Corpus directory resolved against `base`.
    pub fn corpus_dir(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.corpus.dir)
    }

    /// Index root resolved against `base`.
    pub fn index_root(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.index.root)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().expect("defaults validate");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut settings = Settings::default();
        settings.index.chunk_overlap = settings.index.chunk_size;
        assert!(matches!(settings.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn env_and_toml_layers_override_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [index]
                chunk_size = 400
                chunk_overlap = 40

                [retrieval]
                default_k = 5
                "#,
            )?;
            jail.set_env("APP_INDEX__CHUNK_OVERLAP", "80");
            jail.set_env("APP_EMBEDDING__PROVIDER", "mistral");

            let settings = Config::from_figment(Config::figment_for_env("test"))
                .settings()
                .map_err(|e| e.to_string())?;
            assert_eq!(settings.index.chunk_size, 400);
            assert_eq!(settings.index.chunk_overlap, 80);
            assert_eq!(settings.retrieval.default_k, 5);
            assert_eq!(settings.embedding.provider, ProviderKind::Mistral);
            assert_eq!(settings.index.table, "property_chunks");
            Ok(())
        });
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let base = Path::new("/srv/host");
        assert_eq!(resolve_with_base(base, "data"), PathBuf::from("/srv/host/data"));
        assert_eq!(resolve_with_base(base, "/abs/data"), PathBuf::from("/abs/data"));
    }
}
