use std::time::Instant;
use tracing::{info, warn};

use super::providers::LlmProvider;
use super::store::MessageStore;
use crate::models::chat::{ChatMessage, Role};
use crate::utils::error::{ChatError, ChatResult};

pub const DEFAULT_SUMMARY_INSTRUCTION: &str = "Distill the above chat messages into a single summary message. Include as many specific details as you can.";

/// Replaces a history with one backend-written summary turn.
#[derive(Debug, Clone)]
pub struct HistoryCompactor {
    instruction: String,
}

impl Default for HistoryCompactor {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_INSTRUCTION)
    }
}

impl HistoryCompactor {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
        }
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// The messages sent to the backend: the full history, then the
    /// summary instruction as a user turn.
    pub fn build_prompt(&self, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(self.instruction.clone()));
        messages
    }

    /// Summarize `store` in place.
    ///
    /// Returns `Ok(false)` for an empty history. On backend failure the
    /// history is left as it was.
    pub async fn summarize(
        &self,
        store: &mut MessageStore,
        backend: &dyn LlmProvider,
    ) -> ChatResult<bool> {
        if store.is_empty() {
            warn!("Nothing to summarize, history is empty");
            return Ok(false);
        }

        let started = Instant::now();
        let prompt = self.build_prompt(store.messages());
        let summary = backend
            .generate(&prompt)
            .await
            .map_err(|e| ChatError::from_backend("summarize", e))?;

        let replaced = store.len();
        store.clear();
        store.append(Role::Assistant, summary.trim());

        info!(
            "Compacted {} messages into one summary in {:?}",
            replaced,
            started.elapsed()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::providers::MockLlmProvider;

    #[tokio::test]
    async fn test_summarize_replaces_history() {
        let mut store = MessageStore::new();
        store.append(Role::User, "My name is Ada and I like graphs.");
        store.append(Role::Assistant, "Nice to meet you, Ada.");

        let mut backend = MockLlmProvider::new();
        backend
            .expect_generate()
            .withf(|messages| {
                messages.len() == 3
                    && messages[0].content.contains("Ada")
                    && messages[2].role == Role::User
                    && messages[2].content == DEFAULT_SUMMARY_INSTRUCTION
            })
            .times(1)
            .returning(|_| Ok("  Ada introduced herself and likes graphs.  ".to_string()));

        let compactor = HistoryCompactor::default();
        assert!(compactor.summarize(&mut store, &backend).await.unwrap());
        assert_eq!(
            store.messages(),
            &[ChatMessage::assistant("Ada introduced herself and likes graphs.")]
        );
    }

    #[tokio::test]
    async fn test_summarize_empty_history_skips_backend() {
        let mut store = MessageStore::new();
        let mut backend = MockLlmProvider::new();
        backend.expect_generate().times(0);

        let compactor = HistoryCompactor::default();
        assert!(!compactor.summarize(&mut store, &backend).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_summarize_failure_keeps_history() {
        let mut store = MessageStore::new();
        store.append(Role::User, "keep me");
        let before = store.clone();

        let mut backend = MockLlmProvider::new();
        backend
            .expect_generate()
            .returning(|_| Err(anyhow::anyhow!("backend offline")));

        let compactor = HistoryCompactor::default();
        let err = compactor.summarize(&mut store, &backend).await.unwrap_err();
        assert_eq!(err.kind(), "backend_connection");
        assert_eq!(store, before);
    }
}
