pub mod bulk_fetch;
pub mod conversation;
pub mod embedding_service;
pub mod llm_service;
pub mod retrieval;

pub use bulk_fetch::{BulkFetchReport, BulkFetcher};
pub use embedding_service::EmbeddingService;
pub use llm_service::LlmService;
