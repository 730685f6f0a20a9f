//! Configuration model loaded from external sources.

use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::domain::listing::{OperationType, PropertyType};

/// Default location of the optional YAML settings file.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.yaml";

#[derive(Clone, Debug, Deserialize)]
/// Settings shared across job handlers.
pub struct Settings {
    pub database_url: String,
    pub zmq_address: String,
    pub source: SourceSettings,
    pub vector_store: VectorStoreSettings,
    pub embedding: EmbeddingSettings,
    pub ingestion: IngestionSettings,
}

#[derive(Clone, Debug, Deserialize)]
/// Upstream search API parameters.
pub struct SourceSettings {
    pub base_url: String,
    pub site_url: String,
    pub location: String,
    pub page_size: u32,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    Local,
    Remote,
}

#[derive(Clone, Debug, Deserialize)]
/// Connection parameters for the vector store.
pub struct VectorStoreSettings {
    pub mode: StoreMode,
    pub url: Option<String>,
    pub api_key: Option<String>,
}

impl VectorStoreSettings {
    pub const LOCAL_URL: &'static str = "http://localhost:6334";

    /// Resolves the endpoint for the configured mode.
    pub fn endpoint(&self) -> Result<String, ConfigError> {
        match (self.mode, self.url.as_deref()) {
            (_, Some(url)) if !url.trim().is_empty() => Ok(url.trim().to_string()),
            (StoreMode::Local, _) => Ok(Self::LOCAL_URL.to_string()),
            (StoreMode::Remote, _) => Err(ConfigError::Message(
                "vector_store.url is required in remote mode".to_string(),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Fastembed,
    Ollama,
}

#[derive(Clone, Debug, Deserialize)]
/// Embedding model selection.
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub batch_size: usize,
    pub dimensions: u64,
    pub ollama_host: String,
    pub ollama_model: String,
    pub cache_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
/// Scope of an ingestion run and how it is committed.
pub struct IngestionSettings {
    pub operations: Vec<OperationType>,
    pub property_types: Vec<PropertyType>,
    pub upsert_batch_size: usize,
    pub snapshot_dir: Option<PathBuf>,
}

impl Settings {
    /// Loads defaults, then the YAML file at `path` when present, then
    /// `INMUEBLES__`-prefixed environment variables.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let property_types: Vec<&str> = PropertyType::KNOWN.iter().map(|t| t.as_str()).collect();

        let settings: Settings = Config::builder()
            .set_default("database_url", "app.db")?
            .set_default("zmq_address", "tcp://127.0.0.1:5555")?
            .set_default("source.base_url", "https://search-service.fincaraiz.com.co/")?
            .set_default("source.site_url", "https://www.fincaraiz.com.co")?
            .set_default("source.location", "bogota")?
            .set_default("source.page_size", 32)?
            .set_default("source.concurrency", 8)?
            .set_default("source.timeout_secs", 30)?
            .set_default("vector_store.mode", "local")?
            .set_default("embedding.backend", "fastembed")?
            .set_default("embedding.batch_size", 16)?
            .set_default("embedding.dimensions", 768)?
            .set_default("embedding.ollama_host", "http://localhost:11434")?
            .set_default("embedding.ollama_model", "nomic-embed-text")?
            .set_default("ingestion.operations", vec!["Arriendo", "Venta"])?
            .set_default("ingestion.property_types", property_types)?
            .set_default("ingestion.upsert_batch_size", 200)?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("INMUEBLES")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("ingestion.operations")
                    .with_list_parse_key("ingestion.property_types")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.source.page_size == 0 {
            return Err(ConfigError::Message("source.page_size must be positive".into()));
        }
        if self.source.concurrency == 0 {
            return Err(ConfigError::Message("source.concurrency must be positive".into()));
        }
        if self.ingestion.upsert_batch_size == 0 {
            return Err(ConfigError::Message(
                "ingestion.upsert_batch_size must be positive".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Message("embedding.batch_size must be positive".into()));
        }
        self.vector_store.endpoint()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let settings = Settings::load("does/not/exist.yaml").expect("defaults are valid");

        assert_eq!(settings.source.page_size, 32);
        assert_eq!(settings.source.concurrency, 8);
        assert_eq!(settings.ingestion.upsert_batch_size, 200);
        assert_eq!(settings.embedding.dimensions, 768);
        assert_eq!(settings.ingestion.property_types.len(), 15);
        assert_eq!(
            settings.ingestion.operations,
            vec![OperationType::Arriendo, OperationType::Venta]
        );
        assert_eq!(settings.vector_store.mode, StoreMode::Local);
    }

    #[test]
    fn remote_mode_requires_url() {
        let store = VectorStoreSettings {
            mode: StoreMode::Remote,
            url: None,
            api_key: Some("secret".to_string()),
        };
        assert!(store.endpoint().is_err());

        let store = VectorStoreSettings {
            mode: StoreMode::Local,
            url: None,
            api_key: None,
        };
        assert_eq!(store.endpoint().expect("local default"), VectorStoreSettings::LOCAL_URL);
    }
}
