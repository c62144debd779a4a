//! Connection health of the services the pipeline depends on.
//!
//! | Service | Probe |
//! |---------|-------|
//! | `ollama` | `GET {generation.url}/api/tags`, lists model names |
//! | `gitlab` | `GET {gitlab_url}/api/v4/user`, bearer token |
//! | `jira` | `GET {jira_url}/rest/api/2/myself`, basic auth |
//! | `store` | [`Store::ping`] |
//!
//! Checks are resilient: every failure becomes a [`ConnectionStatus`] with
//! `status = error`, never an `Err`. Services without configuration report
//! `not_configured`. [`HealthChecker::check_all`] probes concurrently.

use base64::Engine as _;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::Config;
use crate::store::Store;

pub const SERVICES: &[&str] = &["ollama", "gitlab", "jira", "store"];
const PROBE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Connected,
    Error,
    NotConfigured,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub service: String,
    pub status: ServiceState,
    pub message: String,
    pub response_time_ms: Option<f64>,
    pub details: Option<serde_json::Value>,
}

impl ConnectionStatus {
    fn not_configured(service: &str, message: &str) -> Self {
        Self {
            service: service.to_string(),
            status: ServiceState::NotConfigured,
            message: message.to_string(),
            response_time_ms: None,
            details: None,
        }
    }

    fn error(service: &str, message: String, started: Instant) -> Self {
        Self {
            service: service.to_string(),
            status: ServiceState::Error,
            message,
            response_time_ms: Some(elapsed_ms(started)),
            details: None,
        }
    }

    fn connected(
        service: &str,
        message: String,
        started: Instant,
        details: serde_json::Value,
    ) -> Self {
        Self {
            service: service.to_string(),
            status: ServiceState::Connected,
            message,
            response_time_ms: Some(elapsed_ms(started)),
            details: Some(details),
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

pub struct HealthChecker {
    client: reqwest::Client,
    config: Config,
    store: Arc<dyn Store>,
}

impl HealthChecker {
    pub fn new(config: Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            config,
            store,
        })
    }

    /// Probe one service by name; `None` for an unknown name.
    pub async fn check(&self, service: &str) -> Option<ConnectionStatus> {
        let status = match service {
            "ollama" => self.check_ollama().await,
            "gitlab" => self.check_gitlab().await,
            "jira" => self.check_jira().await,
            "store" => self.check_store().await,
            _ => return None,
        };
        debug!(service, status = ?status.status, "health probe finished");
        Some(status)
    }

    pub async fn check_all(&self) -> Vec<ConnectionStatus> {
        let (ollama, gitlab, jira, store) = tokio::join!(
            self.check_ollama(),
            self.check_gitlab(),
            self.check_jira(),
            self.check_store()
        );
        vec![ollama, gitlab, jira, store]
    }

    async fn get_json(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, String> {
        let resp = request
            .send()
            .await
            .map_err(|e| format!("Connection failed: {}", e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(240).collect();
            return Err(format!("HTTP {}: {}", status.as_u16(), snippet));
        }
        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| format!("Invalid response: {}", e))
    }

    async fn check_ollama(&self) -> ConnectionStatus {
        let generation = &self.config.generation;
        if !generation.is_enabled() {
            return ConnectionStatus::not_configured("ollama", "Generation backend is disabled");
        }

        let started = Instant::now();
        let url = format!("{}/api/tags", generation.url.trim_end_matches('/'));
        match self.get_json(self.client.get(&url)).await {
            Ok(json) => {
                let models: Vec<String> = json
                    .get("models")
                    .and_then(|m| m.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                ConnectionStatus::connected(
                    "ollama",
                    format!("Connected successfully. Available models: {}", models.len()),
                    started,
                    serde_json::json!({ "models": models }),
                )
            }
            Err(e) => ConnectionStatus::error("ollama", e, started),
        }
    }

    async fn check_gitlab(&self) -> ConnectionStatus {
        let integrations = &self.config.integrations;
        let (Some(url), Some(token)) = (&integrations.gitlab_url, &integrations.gitlab_token)
        else {
            return ConnectionStatus::not_configured("gitlab", "GitLab URL or token not configured");
        };

        let started = Instant::now();
        let endpoint = format!("{}/api/v4/user", url.trim_end_matches('/'));
        match self.get_json(self.client.get(&endpoint).bearer_auth(token)).await {
            Ok(json) => {
                let user = json.get("username").and_then(|u| u.as_str()).unwrap_or("");
                ConnectionStatus::connected(
                    "gitlab",
                    format!("Connected successfully as {}", user),
                    started,
                    serde_json::json!({ "user": user }),
                )
            }
            Err(e) => ConnectionStatus::error("gitlab", e, started),
        }
    }

    async fn check_jira(&self) -> ConnectionStatus {
        let integrations = &self.config.integrations;
        let (Some(url), Some(username), Some(token)) = (
            &integrations.jira_url,
            &integrations.jira_username,
            &integrations.jira_token,
        ) else {
            return ConnectionStatus::not_configured("jira", "JIRA URL or credentials not configured");
        };

        let started = Instant::now();
        let endpoint = format!("{}/rest/api/2/myself", url.trim_end_matches('/'));
        let request = self
            .client
            .get(&endpoint)
            .header("Authorization", basic_auth_header(username, token));
        match self.get_json(request).await {
            Ok(json) => {
                let user = json.get("name").and_then(|u| u.as_str()).unwrap_or("");
                ConnectionStatus::connected(
                    "jira",
                    format!("Connected successfully as {}", user),
                    started,
                    serde_json::json!({ "user": user }),
                )
            }
            Err(e) => ConnectionStatus::error("jira", e, started),
        }
    }

    async fn check_store(&self) -> ConnectionStatus {
        let started = Instant::now();
        let ping = tokio::time::timeout(Duration::from_secs(PROBE_TIMEOUT_SECS), self.store.ping());
        match ping.await {
            Ok(Ok(())) => {
                let chunks = self.store.chunk_count().await.unwrap_or(0);
                ConnectionStatus::connected(
                    "store",
                    format!("Connected successfully. Stored chunks: {}", chunks),
                    started,
                    serde_json::json!({
                        "path": self.config.db.path.display().to_string(),
                        "chunks": chunks
                    }),
                )
            }
            Ok(Err(e)) => ConnectionStatus::error("store", format!("Store error: {:#}", e), started),
            Err(_) => ConnectionStatus::error("store", "Store ping timed out".to_string(), started),
        }
    }
}

fn basic_auth_header(username: &str, token: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, token));
    format!("Basic {}", encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::store::InMemoryStore;

    fn checker(extra: &str) -> HealthChecker {
        let config = parse_config(&format!("[db]\npath = \"tsg.sqlite\"\n{}", extra)).unwrap();
        HealthChecker::new(config, Arc::new(InMemoryStore::new())).unwrap()
    }

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth_header("bot", "secret"), "Basic Ym90OnNlY3JldA==");
    }

    #[tokio::test]
    async fn test_unconfigured_services() {
        let c = checker("[generation]\nprovider = \"disabled\"\n");
        for service in ["ollama", "gitlab", "jira"] {
            let status = c.check(service).await.unwrap();
            assert_eq!(status.status, ServiceState::NotConfigured, "{}", service);
        }
    }

    #[tokio::test]
    async fn test_store_connected_and_unknown_service() {
        let c = checker("");
        let status = c.check("store").await.unwrap();
        assert_eq!(status.status, ServiceState::Connected);
        assert!(status.response_time_ms.is_some());
        assert!(c.check("postgres").await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_error_not_failure() {
        let c = checker("[generation]\nurl = \"http://127.0.0.1:1\"\n");
        let all = c.check_all().await;
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].service, "ollama");
        assert_eq!(all[0].status, ServiceState::Error);
        assert!(all[0].message.starts_with("Connection failed"));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&ServiceState::NotConfigured).unwrap();
        assert_eq!(json, "\"not_configured\"");
    }
}
