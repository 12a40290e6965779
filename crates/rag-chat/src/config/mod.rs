pub mod settings;

pub use settings::{
    BackendConfig, BackendKind, BackendKindName, EmbeddingConfig, HistoryConfig, IngestConfig,
    LoggingConfig, PromptsConfig, RetrievalConfig, Settings, SplitterConfig,
};
