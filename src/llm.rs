//! Chat-completion backends.
//!
//! Two wire formats are supported behind one [`ChatBackend`] trait:
//!
//! - **Chat Completions** (`POST {base}/chat/completions`, bearer auth), the
//!   OpenAI-compatible format DeepSeek speaks.
//! - **Messages** (`POST {base}/messages`, `x-api-key` auth), the Anthropic
//!   format.
//!
//! A backend without a key fails with [`Error::Config`] before any request is
//! made. Timeouts, non-2xx statuses and unreadable bodies are
//! [`Error::Transport`].
//!
//! ```no_run
//! use chainsight::config::Config;
//! use chainsight::llm::{self, CompletionRequest};
//! use std::time::Duration;
//!
//! # async fn demo() -> chainsight::Result<()> {
//! let config = Config::load(None)?;
//! let backend = llm::primary_backend(&config);
//! let reply = backend
//!     .complete(&CompletionRequest {
//!         system: "Reply with JSON only.".into(),
//!         prompt: "{\"ping\": true}".into(),
//!         temperature: 0.1,
//!         max_tokens: 100,
//!         timeout: Duration::from_secs(30),
//!     })
//!     .await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::config::{Config, LlmEndpointConfig};
use crate::{Error, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Longest slice of an error body carried into a transport error.
const ERROR_BODY_CHARS: usize = 300;

/// Which service a backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// DeepSeek, or any other OpenAI-compatible chat-completions endpoint.
    DeepSeek,
    /// Anthropic Messages API.
    Anthropic,
}

impl LlmProvider {
    pub fn description(&self) -> &'static str {
        match self {
            LlmProvider::DeepSeek => "DeepSeek (chat completions)",
            LlmProvider::Anthropic => "Anthropic (messages)",
        }
    }

    /// Short name recorded in analysis metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::DeepSeek => "deepseek",
            LlmProvider::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// One prompt to one model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn provider(&self) -> LlmProvider;

    fn model(&self) -> &str;

    /// Send the request and return the assistant's text, trimmed.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// OpenAI-compatible chat completions client.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl ChatCompletionsClient {
    pub fn new(endpoint: &LlmEndpointConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            api_key: endpoint.key(),
        }
    }
}

#[async_trait]
impl ChatBackend for ChatCompletionsClient {
    fn provider(&self) -> LlmProvider {
        LlmProvider::DeepSeek
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("DeepSeek API key is not configured".into()))?;

        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key.expose_secret())
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await?;
        let reply = read_json(resp, "chat completions").await?;

        reply
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::Transport("chat completions reply has no message content".into()))
    }
}

/// Anthropic Messages API client.
pub struct MessagesClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl MessagesClient {
    pub fn new(endpoint: &LlmEndpointConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            api_key: endpoint.key(),
        }
    }
}

#[async_trait]
impl ChatBackend for MessagesClient {
    fn provider(&self) -> LlmProvider {
        LlmProvider::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("Anthropic API key is not configured".into()))?;

        let body = json!({
            "model": self.model,
            "system": request.system,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await?;
        let reply = read_json(resp, "messages").await?;

        reply
            .get("content")
            .and_then(Value::as_array)
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            })
            .and_then(|b| b.get("text"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::Transport("messages reply has no text block".into()))
    }
}

async fn read_json(resp: reqwest::Response, api: &str) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(ERROR_BODY_CHARS).collect();
        return Err(Error::Transport(format!(
            "{api} returned HTTP {status}: {snippet}"
        )));
    }
    resp.json::<Value>()
        .await
        .map_err(|e| Error::Transport(format!("unreadable {api} reply: {e}")))
}

/// Backends with a usable key, DeepSeek first.
pub fn configured_backends(config: &Config) -> Vec<Arc<dyn ChatBackend>> {
    let mut backends: Vec<Arc<dyn ChatBackend>> = Vec::new();
    if config.deepseek.has_key() {
        backends.push(Arc::new(ChatCompletionsClient::new(&config.deepseek)));
    }
    if config.anthropic.has_key() {
        backends.push(Arc::new(MessagesClient::new(&config.anthropic)));
    }
    backends
}

/// The backend used for the analysis stages.
///
/// Prefers DeepSeek, then Anthropic. With neither key set this still returns
/// a DeepSeek client, whose calls fail with [`Error::Config`]; the pipeline
/// reports that as a failed run.
pub fn primary_backend(config: &Config) -> Arc<dyn ChatBackend> {
    match configured_backends(config).into_iter().next() {
        Some(b) => b,
        None => {
            tracing::warn!("no LLM API key configured; analysis stages will fail");
            Arc::new(ChatCompletionsClient::new(&config.deepseek))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "system text".into(),
            prompt: "user text".into(),
            temperature: 0.3,
            max_tokens: 2000,
            timeout: Duration::from_secs(5),
        }
    }

    fn endpoint(base_url: String, key: Option<&str>) -> LlmEndpointConfig {
        let mut ep = LlmEndpointConfig::deepseek();
        ep.base_url = base_url;
        ep.api_key = key.map(|k| SecretString::from(k.to_string()));
        ep
    }

    #[tokio::test]
    async fn test_chat_completions_reads_first_choice() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .body_includes("\"max_tokens\":2000")
                    .body_includes("user text");
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "  {\"ok\": true}\n"}}]
                }));
            })
            .await;

        let client = ChatCompletionsClient::new(&endpoint(server.url("/v1"), Some("sk-test")));
        let reply = client.complete(&request()).await.unwrap();
        assert_eq!(reply, "{\"ok\": true}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_messages_reads_text_block() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/messages")
                    .header("x-api-key", "ak-test")
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .body_includes("system text");
                then.status(200).json_body(json!({
                    "content": [{"type": "text", "text": "{\"ok\": 1}"}]
                }));
            })
            .await;

        let mut ep = LlmEndpointConfig::anthropic();
        ep.base_url = server.url("/v1");
        ep.api_key = Some(SecretString::from("ak-test".to_string()));
        let client = MessagesClient::new(&ep);

        assert_eq!(client.complete(&request()).await.unwrap(), "{\"ok\": 1}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        // Unroutable address; must fail before any connection attempt.
        let client = ChatCompletionsClient::new(&endpoint("http://127.0.0.1:9".into(), None));
        assert!(matches!(
            client.complete(&request()).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_non_success_status_is_transport_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429).body("rate limited");
            })
            .await;

        let client = ChatCompletionsClient::new(&endpoint(server.base_url(), Some("sk-test")));
        match client.complete(&request()).await {
            Err(Error::Transport(msg)) => {
                assert!(msg.contains("429"));
                assert!(msg.contains("rate limited"));
            }
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_configured_backends_order() {
        let config = Config::default()
            .with_anthropic_key("ak")
            .with_deepseek_key("sk");
        let providers: Vec<LlmProvider> = configured_backends(&config)
            .iter()
            .map(|b| b.provider())
            .collect();
        assert_eq!(providers, vec![LlmProvider::DeepSeek, LlmProvider::Anthropic]);

        assert!(configured_backends(&Config::default()).is_empty());
    }

    #[test]
    fn test_provider_display() {
        assert_eq!(LlmProvider::DeepSeek.to_string(), "DeepSeek (chat completions)");
        assert_eq!(LlmProvider::Anthropic.as_str(), "anthropic");
    }
}
