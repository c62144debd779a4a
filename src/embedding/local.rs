//! In-process embedding via fastembed.
//!
//! Models are downloaded from Hugging Face on first load and cached; after
//! that, embedding runs entirely offline. Inference is blocking, so it runs
//! on the blocking pool.

use anyhow::{bail, Result};
use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

use super::EmbeddingModel;

pub struct LocalEmbedding {
    name: String,
    dims: usize,
    model: Arc<Mutex<TextEmbedding>>,
}

impl LocalEmbedding {
    pub async fn load(identity: &str) -> Result<Self> {
        let (variant, dims) = resolve_model(identity)?;
        let model = tokio::task::spawn_blocking(move || {
            TextEmbedding::try_new(InitOptions::new(variant).with_show_download_progress(false))
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))
        })
        .await??;

        Ok(Self {
            name: identity.to_string(),
            dims,
            model: Arc::new(Mutex::new(model)),
        })
    }
}

fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    match name {
        "all-minilm-l6-v2" => Ok((M::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((M::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((M::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((M::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((M::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((M::MultilingualE5Small, 384)),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ),
    }
}

#[async_trait]
impl EmbeddingModel for LocalEmbedding {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            let embeddings = model
                .embed(vec![text], None)
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))?;
            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_models() {
        assert_eq!(resolve_model("all-minilm-l6-v2").unwrap().1, 384);
        assert_eq!(resolve_model("bge-base-en-v1.5").unwrap().1, 768);
    }

    #[test]
    fn test_resolve_unknown_model() {
        let err = resolve_model("codellama").unwrap_err();
        assert!(err.to_string().contains("Unknown local embedding model"));
    }
}
