use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::{BackendConfig, BackendKind};
use crate::models::chat::ChatMessage;
use crate::services::conversation::providers::LlmProvider;
use crate::utils::error::{ChatError, ChatResult};

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

/// HTTP chat backend: hosted OpenAI-compatible API, a local
/// OpenAI-compatible server, or Ollama.
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    kind: BackendKind,
    temperature: f32,
    max_tokens: Option<usize>,
}

impl LlmService {
    pub fn new(config: &BackendConfig) -> ChatResult<Self> {
        let kind = config.resolve()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ChatError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self::with_client(client, kind, config))
    }

    /// Reuse an existing connection pool.
    pub fn with_client(client: Client, kind: BackendKind, config: &BackendConfig) -> Self {
        debug!(
            "LLM backend {} at {} (model: {:?})",
            kind.name(),
            kind.base_url(),
            kind.model()
        );
        Self {
            client,
            kind,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn kind(&self) -> &BackendKind {
        &self.kind
    }

    /// Generate a full completion (no streaming).
    pub async fn generate_chat(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!("Starting chat generation with {} messages", messages.len());

        let request = match &self.kind {
            BackendKind::Hosted {
                base_url,
                model,
                api_key,
            } => self
                .client
                .post(format!("{}/chat/completions", base_url))
                .bearer_auth(api_key)
                .json(&self.completion_request(Some(model), messages)),
            BackendKind::LocalServer { base_url } => self
                .client
                .post(format!("{}/chat/completions", base_url))
                .json(&self.completion_request(None, messages)),
            BackendKind::Ollama { base_url, model } => self
                .client
                .post(format!("{}/api/chat", base_url))
                .json(&OllamaChatRequest {
                    model,
                    messages,
                    stream: false,
                    options: OllamaOptions {
                        temperature: self.temperature,
                        num_predict: self.max_tokens,
                    },
                }),
        };

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to call {} backend", self.kind.name()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM API error: {} - {}", status, body);
        }

        let content = match self.kind {
            BackendKind::Ollama { .. } => {
                let parsed: OllamaChatResponse = response
                    .json()
                    .await
                    .context("Failed to parse Ollama response")?;
                parsed.message.content
            }
            _ => {
                let parsed: ChatCompletionResponse = response
                    .json()
                    .await
                    .context("Failed to parse LLM response")?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("No choices returned from LLM"))?
                    .message
                    .content
            }
        };

        content.ok_or_else(|| anyhow!("LLM returned an empty message"))
    }

    fn completion_request<'a>(
        &self,
        model: Option<&'a str>,
        messages: &'a [ChatMessage],
    ) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for LlmService {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        self.generate_chat(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str, model: Option<&str>, key: Option<&str>) -> BackendConfig {
        BackendConfig {
            base_url: Some(url.to_string()),
            model: model.map(str::to_string),
            api_key: key.map(str::to_string),
            ..BackendConfig::default()
        }
    }

    #[tokio::test]
    async fn test_hosted_backend_sends_bearer_and_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Paris"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service =
            LlmService::new(&config(&server.uri(), Some("gpt-4o-mini"), Some("sk-test"))).unwrap();
        assert_eq!(service.kind().name(), "hosted");

        let reply = service
            .generate(&[ChatMessage::user("Capital of France?")])
            .await
            .unwrap();
        assert_eq!(reply, "Paris");
    }

    #[tokio::test]
    async fn test_ollama_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "llama3",
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3",
                "message": {"role": "assistant", "content": "hello"},
                "done": true
            })))
            .mount(&server)
            .await;

        let service = LlmService::new(&config(&server.uri(), Some("llama3"), None)).unwrap();
        let reply = service.generate(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let service = LlmService::new(&config(&server.uri(), None, None)).unwrap();
        let err = service
            .generate(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_empty_choices_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let service = LlmService::new(&config(&server.uri(), None, None)).unwrap();
        assert!(service.generate(&[ChatMessage::user("hi")]).await.is_err());
    }
}
