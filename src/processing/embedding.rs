use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::models::config::{EmbeddingBackend, EmbeddingSettings};

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("failed to initialize embedding model: {0}")]
    Init(String),
    #[error("embedding inference failed: {0}")]
    Inference(String),
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding task aborted: {0}")]
    Task(String),
    #[error("model returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
    #[error("model returned a vector of length {actual}, expected {expected}")]
    DimensionMismatch { expected: u64, actual: usize },
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Turns normalized text into fixed-length vectors.
///
/// Implementations accept any number of inputs and return one vector per
/// input, in order. Empty strings are valid input.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Length of every vector produced.
    fn dimensions(&self) -> u64;

    async fn embed(&self, texts: Vec<String>) -> EmbeddingResult<Vec<Vec<f32>>>;
}

/// Builds the embedder selected in settings.
pub fn build_embedder(settings: &EmbeddingSettings) -> EmbeddingResult<Arc<dyn TextEmbedder>> {
    Ok(match settings.backend {
        EmbeddingBackend::Fastembed => Arc::new(EmbeddingService::new(
            settings.batch_size,
            settings.dimensions,
            settings.cache_dir.clone(),
        )),
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(
            &settings.ollama_host,
            &settings.ollama_model,
            settings.batch_size,
            settings.dimensions,
        )?),
    })
}

/// Local ONNX embedding model.
///
/// The model is loaded on first use, at most once per service, even when
/// several tasks race to embed first. Inference runs on the CPU, on the
/// blocking pool; GPU inference goes through [`OllamaEmbedder`].
pub struct EmbeddingService {
    batch_size: usize,
    dimensions: u64,
    cache_dir: Option<PathBuf>,
    model: OnceCell<Arc<Mutex<TextEmbedding>>>,
}

impl EmbeddingService {
    pub fn new(batch_size: usize, dimensions: u64, cache_dir: Option<PathBuf>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            dimensions,
            cache_dir,
            model: OnceCell::new(),
        }
    }

    async fn model(&self) -> EmbeddingResult<Arc<Mutex<TextEmbedding>>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let cache_dir = self.cache_dir.clone();
                tokio::task::spawn_blocking(move || {
                    log::info!("Loading embedding model {:?}", EmbeddingModel::NomicEmbedTextV15);
                    let mut options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
                        .with_show_download_progress(false);
                    if let Some(dir) = cache_dir {
                        options = options.with_cache_dir(dir);
                    }
                    TextEmbedding::try_new(options)
                        .map(|model| Arc::new(Mutex::new(model)))
                        .map_err(|e| EmbeddingError::Init(format!("{e:?}")))
                })
                .await
                .map_err(|e| EmbeddingError::Task(e.to_string()))?
            })
            .await?;
        Ok(Arc::clone(model))
    }
}

#[async_trait]
impl TextEmbedder for EmbeddingService {
    fn dimensions(&self) -> u64 {
        self.dimensions
    }

    async fn embed(&self, texts: Vec<String>) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model().await?;
        let batch_size = self.batch_size;
        let expected = texts.len();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbeddingError::Inference("model mutex poisoned".to_string()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| EmbeddingError::Inference(format!("{e:?}")))
        })
        .await
        .map_err(|e| EmbeddingError::Task(e.to_string()))??;

        check_shape(&vectors, expected, self.dimensions)?;
        Ok(vectors)
    }
}

/// Remote embedding through an Ollama server's `/api/embed` endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    batch_size: usize,
    dimensions: u64,
}

impl OllamaEmbedder {
    pub fn new(
        host: &str,
        model: &str,
        batch_size: usize,
        dimensions: u64,
    ) -> EmbeddingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", host.trim_end_matches('/')),
            model: model.to_string(),
            batch_size: batch_size.max(1),
            dimensions,
        })
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl TextEmbedder for OllamaEmbedder {
    fn dimensions(&self) -> u64 {
        self.dimensions
    }

    async fn embed(&self, texts: Vec<String>) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let response: OllamaResponse = self
                .client
                .post(&self.endpoint)
                .json(&OllamaRequest {
                    model: &self.model,
                    input: chunk,
                })
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            check_shape(&response.embeddings, chunk.len(), self.dimensions)?;
            vectors.extend(response.embeddings);
        }
        Ok(vectors)
    }
}

fn check_shape(vectors: &[Vec<f32>], expected: usize, dimensions: u64) -> EmbeddingResult<()> {
    if vectors.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() as u64 != dimensions) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimensions,
            actual: bad.len(),
        });
    }
    Ok(())
}
