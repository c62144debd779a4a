//! Embedding models and the lazily initialised [`Embedder`].
//!
//! Defines the [`EmbeddingModel`] trait and the backends behind it:
//! - **[`HashEmbedding`]**: deterministic feature hashing of word tokens; offline.
//! - **[`OllamaEmbedding`]**: calls an Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedding`**: runs models in-process via fastembed (feature `local-embeddings`).
//!
//! Also provides vector utilities used by storage and search:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`l2_norm`]: Euclidean length of a vector
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Initialisation and fallback
//!
//! An [`Embedder`] loads its model on first use, exactly once, even when
//! several tasks race to embed concurrently. If the configured model fails to
//! load, the provider's fixed fallback identity is loaded instead and the
//! substitution is logged. The substitution is permanent for the lifetime of
//! the `Embedder`. If the fallback fails too, that failure is kept as well:
//! every later call returns the same error without loading again.
//!
//! | Provider | Fallback identity |
//! |----------|-------------------|
//! | `hash` | `hash` |
//! | `ollama` | `nomic-embed-text` |
//! | `local` | `all-minilm-l6-v2` |

#[cfg(feature = "local-embeddings")]
mod local;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::EmbeddingConfig;
use crate::models::Outcome;

/// Default vector length of the `hash` provider.
pub const DEFAULT_HASH_DIMS: usize = 384;

/// A loaded embedding model.
///
/// `embed` must be deterministic: the same text always yields the same
/// vector, and every vector has length [`dims`](EmbeddingModel::dims).
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Identity of the loaded model (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Loads a model by identity.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, identity: &str) -> Result<Box<dyn EmbeddingModel>>;
}

/// The model identity an [`Embedder`] ended up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveModel {
    pub identity: String,
    pub dims: usize,
}

struct Loaded {
    model: Box<dyn EmbeddingModel>,
    substitution: Option<String>,
}

/// Construct-once wrapper around a [`ModelLoader`].
pub struct Embedder {
    loader: Arc<dyn ModelLoader>,
    configured: String,
    fallback: String,
    cell: OnceCell<std::result::Result<Loaded, String>>,
}

impl Embedder {
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        configured: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            loader,
            configured: configured.into(),
            fallback: fallback.into(),
            cell: OnceCell::new(),
        }
    }

    /// Build an embedder for the configured provider.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let fallback = fallback_identity(&config.provider)?;
        let configured = config
            .model
            .clone()
            .unwrap_or_else(|| fallback.to_string());
        let loader = ProviderLoader::new(config.clone());
        Ok(Self::new(Arc::new(loader), configured, fallback))
    }

    pub fn configured_identity(&self) -> &str {
        &self.configured
    }

    async fn loaded(&self) -> Result<&Loaded> {
        self.cell
            .get_or_init(|| async { self.load_once().await.map_err(|e| e.to_string()) })
            .await
            .as_ref()
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    async fn load_once(&self) -> Result<Loaded> {
        match self.loader.load(&self.configured).await {
            Ok(model) => {
                tracing::info!(model = %self.configured, dims = model.dims(), "embedding model loaded");
                Ok(Loaded {
                    model,
                    substitution: None,
                })
            }
            Err(primary) if self.configured != self.fallback => {
                tracing::warn!(
                    configured = %self.configured,
                    fallback = %self.fallback,
                    error = %primary,
                    "embedding model failed to load; substituting fallback"
                );
                let model = self.loader.load(&self.fallback).await.map_err(|e| {
                    tracing::error!(fallback = %self.fallback, error = %e, "fallback embedding model failed to load");
                    anyhow::anyhow!(
                        "embedding model '{}' failed ({}) and fallback '{}' failed ({})",
                        self.configured,
                        primary,
                        self.fallback,
                        e
                    )
                })?;
                Ok(Loaded {
                    model,
                    substitution: Some(format!(
                        "model '{}' failed to load: {}",
                        self.configured, primary
                    )),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Embed `text` with the active model, loading it on first use.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let loaded = self.loaded().await?;
        let vector = loaded.model.embed(text).await?;
        if vector.len() != loaded.model.dims() {
            bail!(
                "model '{}' returned {} dimensions, expected {}",
                loaded.model.model_name(),
                vector.len(),
                loaded.model.dims()
            );
        }
        Ok(vector)
    }

    /// The model in use, `Degraded` when the fallback was substituted.
    pub async fn active_model(&self) -> Result<Outcome<ActiveModel>> {
        let loaded = self.loaded().await?;
        let active = ActiveModel {
            identity: loaded.model.model_name().to_string(),
            dims: loaded.model.dims(),
        };
        Ok(match &loaded.substitution {
            None => Outcome::Ok(active),
            Some(reason) => Outcome::Degraded {
                result: active,
                reason: reason.clone(),
            },
        })
    }
}

/// Fixed fallback identity for a provider.
pub fn fallback_identity(provider: &str) -> Result<&'static str> {
    match provider {
        "hash" => Ok("hash"),
        "ollama" => Ok("nomic-embed-text"),
        "local" => Ok("all-minilm-l6-v2"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Provider dispatch ============

/// Loads models for the provider named in [`EmbeddingConfig::provider`].
pub struct ProviderLoader {
    config: EmbeddingConfig,
}

impl ProviderLoader {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelLoader for ProviderLoader {
    async fn load(&self, identity: &str) -> Result<Box<dyn EmbeddingModel>> {
        match self.config.provider.as_str() {
            "hash" => Ok(Box::new(HashEmbedding::named(
                identity,
                self.config.dims.unwrap_or(DEFAULT_HASH_DIMS),
            )?)),
            "ollama" => Ok(Box::new(OllamaEmbedding::connect(&self.config, identity).await?)),
            #[cfg(feature = "local-embeddings")]
            "local" => Ok(Box::new(local::LocalEmbedding::load(identity).await?)),
            #[cfg(not(feature = "local-embeddings"))]
            "local" => bail!("Local embedding provider requires --features local-embeddings"),
            other => bail!("Unknown embedding provider: {}", other),
        }
    }
}

// ============ Hash Embedding ============

/// Feature-hashing embedding over lowercase word tokens.
///
/// Each token is hashed with SHA-256; the first eight bytes pick a bucket and
/// the ninth picks a sign. The bucket counts are L2-normalised. Text with no
/// word tokens maps to the zero vector.
pub struct HashEmbedding {
    name: String,
    dims: usize,
}

impl HashEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            name: "hash".to_string(),
            dims: dims.max(1),
        }
    }

    /// Accepts `hash` or `hash-<suffix>` identities.
    pub fn named(identity: &str, dims: usize) -> Result<Self> {
        if identity != "hash" && !identity.starts_with("hash-") {
            bail!("unknown hash embedding model: '{}'", identity);
        }
        Ok(Self {
            name: identity.to_string(),
            dims: dims.max(1),
        })
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut idx = [0u8; 8];
            idx.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(idx) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = l2_norm(&v);
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl EmbeddingModel for HashEmbedding {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }
}

// ============ Ollama Embedding ============

/// Embedding model served by a local Ollama instance.
///
/// Calls `POST /api/embed`. Loading probes the model once to learn its
/// dimensionality, so an unknown or unpulled model fails at load time.
pub struct OllamaEmbedding {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedding {
    pub async fn connect(config: &EmbeddingConfig, model: &str) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let mut provider = Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dims: 0,
        };
        let probe = provider.request("dimension probe").await?;
        if let Some(expected) = config.dims {
            if probe.len() != expected {
                bail!(
                    "Ollama model '{}' returns {} dimensions, embedding.dims is {}",
                    model,
                    probe.len(),
                    expected
                );
            }
        }
        provider.dims = probe.len();
        Ok(provider)
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_ollama_response(&json)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

#[async_trait]
impl EmbeddingModel for OllamaEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(text).await
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use ticket_suggest::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `None` when the similarity is undefined: empty vectors, vectors
/// of different lengths, or a zero-norm operand.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();

    Some((dot / denom).clamp(-1.0, 1.0))
}
