//! Text generation backends.
//!
//! The suggestion assembler hands a finished prompt to a
//! [`GenerationBackend`] and gets generated text back, or a
//! [`GenerationError`] that it turns into a fallback result.
//!
//! - [`OllamaGenerator`] performs a non-streaming `POST {url}/api/generate`.
//! - [`DisabledGenerator`] always fails, forcing the fallback path.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::GenerationConfig;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend is disabled")]
    Disabled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {status} from {url}: {snippet}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        /// First 240 characters of the response body.
        snippet: String,
    },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        GenerationError::Transport(e.to_string())
    }
}

/// Sampling options, named as Ollama names them.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    /// Request for `prompt` with the configured sampling options.
    pub fn new(config: &GenerationConfig, model: &str, prompt: String) -> Self {
        Self {
            model: model.to_string(),
            prompt,
            options: GenerationOptions {
                temperature: config.temperature,
                top_p: config.top_p,
                num_predict: config.max_tokens,
            },
        }
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Build the backend named by `generation.provider`.
pub fn create_generator(
    config: &GenerationConfig,
) -> anyhow::Result<std::sync::Arc<dyn GenerationBackend>> {
    match config.provider.as_str() {
        "ollama" => Ok(std::sync::Arc::new(OllamaGenerator::new(config)?)),
        "disabled" => Ok(std::sync::Arc::new(DisabledGenerator)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl GenerationBackend for DisabledGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    url_generate: String,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: &'a GenerationOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let endpoint = config.url.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            anyhow::bail!("invalid Ollama endpoint: '{}'", config.url);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url_generate: format!("{}/api/generate", endpoint.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaGenerator {
    #[instrument(skip_all, fields(model = %request.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = GenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            options: &request.options,
        };

        debug!("POST {}", self.url_generate);
        let resp = self
            .client
            .post(&self.url_generate)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(GenerationError::HttpStatus {
                status,
                url: self.url_generate.clone(),
                snippet: text.chars().take(240).collect(),
            });
        }

        let out: GenerateResponse = resp.json().await.map_err(|e| {
            GenerationError::Decode(format!("serde error: {e}; ensure `stream=false` is used"))
        })?;

        Ok(out.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_generator_fails() {
        let request = GenerationRequest::new(&GenerationConfig::default(), "codellama", "p".into());
        let err = DisabledGenerator.generate(&request).await.unwrap_err();
        assert!(matches!(err, GenerationError::Disabled));
    }

    #[test]
    fn test_request_carries_sampling_options() {
        let config = GenerationConfig {
            max_tokens: Some(512),
            ..GenerationConfig::default()
        };
        let request = GenerationRequest::new(&config, "codellama:13b", "prompt".into());
        assert_eq!(request.model, "codellama:13b");
        assert_eq!(request.options.num_predict, Some(512));

        let json = serde_json::to_value(&request.options).unwrap();
        assert_eq!(json["num_predict"], 512);
        let no_limit = serde_json::to_value(
            &GenerationRequest::new(&GenerationConfig::default(), "m", "p".into()).options,
        )
        .unwrap();
        assert!(no_limit.get("num_predict").is_none());
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let config = GenerationConfig {
            url: "localhost:11434".to_string(),
            ..GenerationConfig::default()
        };
        assert!(OllamaGenerator::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let config = GenerationConfig {
            url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..GenerationConfig::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        let request = GenerationRequest::new(&config, "codellama", "p".into());
        let err = generator.generate(&request).await.unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)));
    }
}
