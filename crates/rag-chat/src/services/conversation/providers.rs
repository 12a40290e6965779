//! Collaborator seams used by the conversation core.

use anyhow::Result;
use std::sync::Arc;

use crate::models::chat::ChatMessage;
use crate::models::document::RetrievalChunk;
use crate::services::retrieval::SearchParams;

/// Chat-completion backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Turns text into vectors for similarity search.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// A populated collection that can be searched and dropped.
#[async_trait::async_trait]
pub trait RetrievalHandle: Send + Sync {
    fn collection_name(&self) -> String;

    async fn retrieve(&self, query: &str, params: &SearchParams) -> Result<Vec<RetrievalChunk>>;

    /// Drop the collection. Later calls to `retrieve` fail.
    async fn delete(&self) -> Result<()>;
}

/// Builds searchable collections out of chunks.
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn index(
        &self,
        chunks: Vec<RetrievalChunk>,
        embedder: Arc<dyn EmbeddingProvider>,
        collection_name: Option<String>,
    ) -> Result<Arc<dyn RetrievalHandle>>;
}
