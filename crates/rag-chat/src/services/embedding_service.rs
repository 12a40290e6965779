use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::services::conversation::providers::EmbeddingProvider;
use crate::utils::error::{ChatError, ChatResult};

/// The same text goes out under every field name the common servers read:
/// `input` (OpenAI), `prompt` (Ollama) and `content` (llama.cpp).
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    prompt: &'a str,
    content: &'a str,
}

#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dimension: Option<usize>,
}

impl EmbeddingService {
    pub fn new(config: &EmbeddingConfig) -> ChatResult<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(ChatError::Configuration(
                "embedding.base_url is required".to_string(),
            ));
        }
        if config.dimension == Some(0) {
            return Err(ChatError::Configuration(
                "embedding.dimension must be > 0".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ChatError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/{}", base_url, config.path.trim_start_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            dimension: config.dimension,
        })
    }

    async fn embed_internal(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
            prompt: text,
            content: text,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Embedding API error ({}): {}", status, body);
        }

        let json_value: Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embedding = parse_embedding(&json_value)?;

        if let Some(expected) = self.dimension {
            if embedding.len() != expected {
                bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    expected,
                    embedding.len()
                );
            }
        }

        Ok(embedding)
    }
}

fn floats(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Accepts `{"embedding": [...]}` (Ollama, llama.cpp),
/// `{"data": [{"embedding": [...]}]}` (OpenAI), `[{"embedding": [...]}]`
/// and a bare `[...]`.
fn parse_embedding(json_value: &Value) -> Result<Vec<f32>> {
    let embedding = match json_value {
        Value::Array(arr) => match arr.first() {
            None => bail!("Empty array returned from embedding server"),
            Some(first) => match first.get("embedding").and_then(Value::as_array) {
                Some(inner) => floats(inner),
                None => floats(arr),
            },
        },
        Value::Object(obj) => {
            if let Some(inner) = obj.get("embedding").and_then(Value::as_array) {
                floats(inner)
            } else if let Some(inner) = obj
                .get("data")
                .and_then(Value::as_array)
                .and_then(|data| data.first())
                .and_then(|first| first.get("embedding"))
                .and_then(Value::as_array)
            {
                floats(inner)
            } else {
                bail!("Unrecognized embedding response format: {}", json_value);
            }
        }
        _ => bail!("Unrecognized embedding response format: {}", json_value),
    };

    if embedding.is_empty() {
        bail!("Generated embedding is empty");
    }
    Ok(embedding)
}

#[async_trait::async_trait]
impl EmbeddingProvider for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_internal(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_embedding_formats() {
        assert_eq!(parse_embedding(&json!({"embedding": [0.5, 1.0]})).unwrap(), vec![0.5, 1.0]);
        assert_eq!(
            parse_embedding(&json!({"data": [{"embedding": [1.0, 2.0]}]})).unwrap(),
            vec![1.0, 2.0]
        );
        assert_eq!(parse_embedding(&json!([{"embedding": [3.0]}])).unwrap(), vec![3.0]);
        assert_eq!(parse_embedding(&json!([0.25, 0.75])).unwrap(), vec![0.25, 0.75]);

        assert!(parse_embedding(&json!([])).is_err());
        assert!(parse_embedding(&json!({"embedding": []})).is_err());
        assert!(parse_embedding(&json!({"vectors": [1.0]})).is_err());
        assert!(parse_embedding(&json!("nope")).is_err());
    }

    #[tokio::test]
    async fn test_embed_against_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_partial_json(json!({"model": "nomic-embed-text", "prompt": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.1, 0.2, 0.3]})))
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            base_url: server.uri(),
            dimension: Some(3),
            ..EmbeddingConfig::default()
        };
        let service = EmbeddingService::new(&config).unwrap();
        let vector = service.embed("hello").await.unwrap();
        assert_eq!(vector.len(), 3);

        let batch = service
            .embed_batch(&["hello".to_string(), "hello".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.1, 0.2]})))
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            base_url: server.uri(),
            dimension: Some(3),
            ..EmbeddingConfig::default()
        };
        let service = EmbeddingService::new(&config).unwrap();
        let err = service.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn test_rejects_empty_base_url() {
        let config = EmbeddingConfig {
            base_url: " ".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            EmbeddingService::new(&config),
            Err(ChatError::Configuration(_))
        ));
    }
}
