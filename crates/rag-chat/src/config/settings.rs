use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::services::retrieval::{SearchMode, SearchParams};
use crate::utils::error::{ChatError, ChatResult};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const OPENAI_URL: &str = "https://api.openai.com/v1";
pub const LMSTUDIO_URL: &str = "http://localhost:1234/v1";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub splitter: SplitterConfig,
    pub ingest: IngestConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
    pub prompts: PromptsConfig,
}

/// Which wire protocol a backend speaks.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKindName {
    /// Hosted, key-authenticated, OpenAI-compatible API.
    Hosted,
    /// Local OpenAI-compatible server without auth or model selection.
    LocalServer,
    /// Ollama serving a named model.
    Ollama,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// Forces the backend kind instead of inferring it.
    pub kind: Option<BackendKindName>,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub max_tokens: Option<usize>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            api_key: None,
            kind: None,
            temperature: 0.7,
            timeout_seconds: 120,
            max_tokens: None,
        }
    }
}

/// A backend with every field it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Hosted {
        base_url: String,
        model: String,
        api_key: String,
    },
    LocalServer {
        base_url: String,
    },
    Ollama {
        base_url: String,
        model: String,
    },
}

impl BackendKind {
    pub fn base_url(&self) -> &str {
        match self {
            Self::Hosted { base_url, .. }
            | Self::LocalServer { base_url }
            | Self::Ollama { base_url, .. } => base_url,
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Hosted { model, .. } | Self::Ollama { model, .. } => Some(model),
            Self::LocalServer { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hosted { .. } => "hosted",
            Self::LocalServer { .. } => "local_server",
            Self::Ollama { .. } => "ollama",
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl BackendConfig {
    /// Default endpoint (and key) for well-known model names.
    pub fn preset_for(model: &str) -> Option<(&'static str, Option<&'static str>)> {
        let model = model.to_lowercase();
        if model.contains("lmstudio") {
            Some((LMSTUDIO_URL, Some("lm-studio")))
        } else if model.contains("gpt") {
            Some((OPENAI_URL, None))
        } else if model.starts_with("llama") || model.starts_with("phi") {
            Some((DEFAULT_OLLAMA_URL, None))
        } else {
            None
        }
    }

    /// Validate once and pick the backend.
    ///
    /// Without an explicit `kind`: key + model + url is hosted, url without
    /// model is a local server, anything else with a model is Ollama.
    pub fn resolve(&self) -> ChatResult<BackendKind> {
        let model = non_empty(&self.model);
        let mut api_key = non_empty(&self.api_key);
        let mut base_url = non_empty(&self.base_url);

        if let Some((url, key)) = model.as_deref().and_then(Self::preset_for) {
            if base_url.is_none() {
                base_url = Some(url.to_string());
            }
            if api_key.is_none() {
                api_key = key.map(str::to_string);
            }
        }
        let base_url = base_url.map(|u| u.trim_end_matches('/').to_string());

        let missing = |field: &str, kind: &str| {
            ChatError::Configuration(format!("backend.{} is required for a {} backend", field, kind))
        };

        match self.kind {
            Some(BackendKindName::Hosted) => Ok(BackendKind::Hosted {
                base_url: base_url.ok_or_else(|| missing("base_url", "hosted"))?,
                model: model.ok_or_else(|| missing("model", "hosted"))?,
                api_key: api_key.ok_or_else(|| missing("api_key", "hosted"))?,
            }),
            Some(BackendKindName::LocalServer) => Ok(BackendKind::LocalServer {
                base_url: base_url.ok_or_else(|| missing("base_url", "local server"))?,
            }),
            Some(BackendKindName::Ollama) => Ok(BackendKind::Ollama {
                base_url: base_url.unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
                model: model.ok_or_else(|| missing("model", "ollama"))?,
            }),
            None => match (api_key, model, base_url) {
                (Some(api_key), Some(model), Some(base_url)) => Ok(BackendKind::Hosted {
                    base_url,
                    model,
                    api_key,
                }),
                (_, None, Some(base_url)) => Ok(BackendKind::LocalServer { base_url }),
                (None, Some(_), Some(base_url)) if base_url == OPENAI_URL => {
                    Err(missing("api_key", "hosted"))
                }
                (_, Some(model), base_url) => Ok(BackendKind::Ollama {
                    base_url: base_url.unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
                    model,
                }),
                (_, None, None) => Err(ChatError::Configuration(
                    "backend needs a base_url or a model".to_string(),
                )),
            },
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    /// Endpoint path appended to `base_url`.
    pub path: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Expected vector length, checked on every response when set.
    pub dimension: Option<usize>,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            path: "/api/embeddings".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            dimension: None,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub collection_name: Option<String>,
    pub search_type: String,
    pub search_k: usize,
    pub search_fetch_k: usize,
    pub score_threshold: Option<f32>,
    pub mmr_lambda: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            collection_name: None,
            search_type: "mmr".to_string(),
            search_k: 8,
            search_fetch_k: 20,
            score_threshold: None,
            mmr_lambda: 0.5,
        }
    }
}

impl RetrievalConfig {
    pub fn search_params(&self) -> ChatResult<SearchParams> {
        let params = SearchParams {
            mode: self.search_type.parse::<SearchMode>()?,
            k: self.search_k,
            fetch_k: self.search_fetch_k,
            score_threshold: self.score_threshold,
            lambda_mult: self.mmr_lambda,
        };
        params.validate()?;
        Ok(params)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Concurrent fetches during bulk ingestion.
    pub workers: usize,
    pub request_timeout_seconds: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    /// Where `/save` writes transcripts.
    pub directory: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("history"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    /// Daily rolling log files go here; empty or unset logs to stderr.
    pub directory: Option<String>,
    /// Used when `RUST_LOG` is not set.
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            directory: Some("logs".to_string()),
            filter: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct PromptsConfig {
    pub system_template: Option<String>,
    pub summary_instruction: Option<String>,
}

impl Settings {
    /// Layered load: `.env`, then the settings file (optional), then
    /// `RAGCHAT__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config/settings"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("RAGCHAT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;

        if settings.backend.api_key.is_none() {
            settings.backend.api_key = std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: Option<&str>, model: Option<&str>, key: Option<&str>) -> BackendConfig {
        BackendConfig {
            base_url: url.map(str::to_string),
            model: model.map(str::to_string),
            api_key: key.map(str::to_string),
            ..BackendConfig::default()
        }
    }

    #[test]
    fn test_hosted_when_key_model_and_url() {
        let kind = backend(Some("https://api.example.com/v1/"), Some("gpt-4o-mini"), Some("sk-1"))
            .resolve()
            .unwrap();
        assert_eq!(
            kind,
            BackendKind::Hosted {
                base_url: "https://api.example.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key: "sk-1".to_string(),
            }
        );
    }

    #[test]
    fn test_local_server_without_model() {
        let kind = backend(Some("http://localhost:8080"), None, None).resolve().unwrap();
        assert_eq!(kind.name(), "local_server");
        assert_eq!(kind.model(), None);
    }

    #[test]
    fn test_ollama_with_model() {
        let kind = backend(None, Some("mistral"), None).resolve().unwrap();
        assert_eq!(
            kind,
            BackendKind::Ollama {
                base_url: DEFAULT_OLLAMA_URL.to_string(),
                model: "mistral".to_string(),
            }
        );
    }

    #[test]
    fn test_gpt_preset_needs_key() {
        let kind = backend(None, Some("gpt-4o"), Some("sk-2")).resolve().unwrap();
        assert_eq!(kind.base_url(), OPENAI_URL);
        assert_eq!(kind.name(), "hosted");

        let err = backend(None, Some("gpt-4o"), None).resolve().unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));
    }

    #[test]
    fn test_lmstudio_preset() {
        let kind = backend(None, Some("lmstudio-community"), None).resolve().unwrap();
        assert_eq!(kind.name(), "hosted");
        assert_eq!(kind.base_url(), LMSTUDIO_URL);
    }

    #[test]
    fn test_missing_everything_is_configuration_error() {
        let err = backend(None, None, Some("sk")).resolve().unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));

        let err = backend(Some("  "), Some(""), None).resolve().unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));
    }

    #[test]
    fn test_explicit_kind_checks_fields() {
        let mut cfg = backend(Some("http://x"), None, None);
        cfg.kind = Some(BackendKindName::Hosted);
        assert!(matches!(cfg.resolve(), Err(ChatError::Configuration(msg)) if msg.contains("model")));
    }

    #[test]
    fn test_retrieval_defaults() {
        let params = RetrievalConfig::default().search_params().unwrap();
        assert_eq!(params.mode, SearchMode::Mmr);
        assert_eq!(params.k, 8);

        let bad = RetrievalConfig {
            search_type: "nearest".to_string(),
            ..RetrievalConfig::default()
        };
        assert!(matches!(bad.search_params(), Err(ChatError::Validation(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[backend]\nmodel = \"llama3\"\n\n[retrieval]\nsearch_type = \"similarity\"\nsearch_k = 4\n",
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.backend.model.as_deref(), Some("llama3"));
        assert_eq!(settings.retrieval.search_k, 4);
        assert_eq!(settings.ingest.workers, 5);
        assert_eq!(settings.splitter.chunk_size, 2000);
    }
}
