use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::chain::{ChainOutput, ChainStrategy, ConversationChain};
use super::compactor::HistoryCompactor;
use super::providers::LlmProvider;
use super::store::MessageStore;
use crate::config::BackendConfig;
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::chat::{ChatMessage, SessionId};
use crate::services::llm_service::LlmService;
use crate::utils::error::{ChatError, ChatResult};

/// One conversation: a backend, a chain strategy and the history they share.
pub struct ConversationSession {
    id: SessionId,
    backend: Arc<dyn LlmProvider>,
    strategy: ChainStrategy,
    /// Built on first use, then reused for every turn.
    chain: OnceCell<ConversationChain>,
    store: MessageStore,
    compactor: HistoryCompactor,
    logger: ActivityLogger,
    destroyed: bool,
}

impl ConversationSession {
    /// Build a session against the backend described by `config`.
    ///
    /// Fails with `ChatError::Configuration` when the backend is incomplete
    /// and with `ChatError::Validation` when the search parameters are bad.
    pub fn new(
        config: &BackendConfig,
        strategy: ChainStrategy,
        logger: ActivityLogger,
    ) -> ChatResult<Self> {
        let backend: Arc<dyn LlmProvider> = Arc::new(LlmService::new(config)?);
        Self::with_backend(backend, strategy, logger)
    }

    pub fn with_backend(
        backend: Arc<dyn LlmProvider>,
        strategy: ChainStrategy,
        logger: ActivityLogger,
    ) -> ChatResult<Self> {
        if let ChainStrategy::Retrieval { search, .. } = &strategy {
            search.validate()?;
        }
        let id = Uuid::new_v4();

        info!("Session {} created with {} chain", id, strategy.name());

        let mut log = ActivityLog::builder(id, ActivityType::SessionCreated)
            .status(ActivityStatus::Info)
            .custom("strategy", strategy.name());
        if let Some(handle) = strategy.handle() {
            log = log.collection(handle.collection_name());
        }
        logger.log(log.build());

        Ok(Self {
            id,
            backend,
            strategy,
            chain: OnceCell::new(),
            store: MessageStore::new(),
            compactor: HistoryCompactor::default(),
            logger,
            destroyed: false,
        })
    }

    pub fn with_compactor(mut self, compactor: HistoryCompactor) -> Self {
        self.compactor = compactor;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn strategy(&self) -> &ChainStrategy {
        &self.strategy
    }

    pub fn history(&self) -> &[ChatMessage] {
        self.store.messages()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Answer `prompt` and record the exchange.
    ///
    /// The user turn and the answer are appended only once the whole chain
    /// succeeded; a failed call leaves the history as it was.
    pub async fn invoke(&mut self, prompt: &str) -> ChatResult<String> {
        if self.destroyed {
            warn!("Session {} invoked after destroy", self.id);
            return Err(ChatError::ResourceState(format!(
                "session {} has been destroyed",
                self.id
            )));
        }

        let started = Instant::now();
        debug!("Session {} invoke with {} prior turns", self.id, self.store.len());

        let chain = self
            .chain
            .get_or_try_init(|| ConversationChain::build(&self.strategy, self.backend.clone()))?;

        match chain.invoke(prompt, self.store.messages()).await {
            Ok(output) => {
                for turn in output.turns() {
                    self.store.push(turn);
                }
                self.log_success(&output, started.elapsed().as_millis() as u64);
                Ok(output.answer)
            }
            Err(e) => {
                let activity = match &e {
                    ChatError::ResourceState(_) => ActivityType::RetrievalError,
                    _ => ActivityType::LlmError,
                };
                self.logger.log(
                    ActivityLog::builder(self.id, activity)
                        .message(prompt)
                        .history_len(self.store.len())
                        .processing_time(started.elapsed().as_millis() as u64)
                        .error(e.to_string(), e.kind())
                        .build(),
                );
                Err(e)
            }
        }
    }

    fn log_success(&self, output: &ChainOutput, elapsed_ms: u64) {
        let timings = output.timings;

        if let (Some(query), Some(took)) = (&output.standalone_query, timings.condense) {
            self.logger.log(
                ActivityLog::builder(self.id, ActivityType::QueryCondensed)
                    .message(query.clone())
                    .llm_duration(took.as_millis() as u64)
                    .build(),
            );
        }

        if let (Some(handle), Some(took)) = (self.strategy.handle(), timings.retrieval) {
            self.logger.log(
                ActivityLog::builder(self.id, ActivityType::RetrievalExecuted)
                    .collection(handle.collection_name())
                    .chunk_count(output.chunks.len())
                    .retrieval_duration(took.as_millis() as u64)
                    .build(),
            );
        }

        self.logger.log(
            ActivityLog::builder(self.id, ActivityType::MessageSent)
                .message(output.prompt.clone())
                .response(output.answer.clone())
                .history_len(self.store.len())
                .llm_duration(timings.generation.as_millis() as u64)
                .processing_time(elapsed_ms)
                .build(),
        );
    }

    /// Drop the whole history.
    pub fn clear(&mut self) {
        let dropped = self.store.len();
        self.store.clear();
        info!("Session {} history cleared ({} turns)", self.id, dropped);

        self.logger.log(
            ActivityLog::builder(self.id, ActivityType::HistoryCleared)
                .history_len(0)
                .custom("dropped", dropped)
                .build(),
        );
    }

    /// See [`MessageStore::modify`].
    pub fn modify(&mut self, n: Option<i64>) -> bool {
        let before = self.store.len();
        let applied = self.store.modify(n);

        let status = if applied {
            ActivityStatus::Success
        } else {
            ActivityStatus::Warning
        };
        let mut log = ActivityLog::builder(self.id, ActivityType::HistoryModified)
            .status(status)
            .history_len(self.store.len())
            .custom("before", before);
        if let Some(n) = n {
            log = log.custom("n", n);
        }
        self.logger.log(log.build());

        applied
    }

    /// Replace the history with a single summary turn.
    pub async fn summarize(&mut self) -> ChatResult<bool> {
        if self.destroyed {
            warn!("Session {} summarize after destroy", self.id);
            return Err(ChatError::ResourceState(format!(
                "session {} has been destroyed",
                self.id
            )));
        }

        let started = Instant::now();
        let before = self.store.len();
        let result = self
            .compactor
            .summarize(&mut self.store, self.backend.as_ref())
            .await;

        let log = ActivityLog::builder(self.id, ActivityType::HistorySummarized)
            .processing_time(started.elapsed().as_millis() as u64)
            .history_len(self.store.len())
            .custom("before", before);
        let log = match &result {
            Ok(true) => log,
            Ok(false) => log.status(ActivityStatus::Info),
            Err(e) => log.error(e.to_string(), e.kind()),
        };
        self.logger.log(log.build());

        result
    }

    /// Write the numbered transcript into `dir`.
    pub fn save_transcript(&self, dir: &Path) -> ChatResult<PathBuf> {
        let path = self
            .store
            .save_transcript(dir)
            .map_err(|e| ChatError::ResourceState(format!("save transcript: {:#}", e)))?;

        self.logger.log(
            ActivityLog::builder(self.id, ActivityType::TranscriptSaved)
                .history_len(self.store.len())
                .custom("path", path.display().to_string())
                .build(),
        );
        Ok(path)
    }

    /// Release the retrieval collection, if any. Later `invoke` calls fail.
    ///
    /// A second call only warns. If the collection cannot be deleted the
    /// session stays live, so `destroy` can be retried.
    pub async fn destroy(&mut self) -> ChatResult<()> {
        if self.destroyed {
            warn!("Session {} already destroyed", self.id);
            return Ok(());
        }

        let mut log = ActivityLog::builder(self.id, ActivityType::SessionDestroyed)
            .history_len(self.store.len());

        if let Some(handle) = self.strategy.handle() {
            let name = handle.collection_name();
            log = log.collection(name.clone());
            if let Err(e) = handle.delete().await {
                let err = ChatError::from_backend("delete", e);
                self.logger
                    .log(log.error(err.to_string(), err.kind()).build());
                return Err(err);
            }
            info!("Session {} dropped collection {}", self.id, name);
        }

        self.destroyed = true;
        self.logger.log(log.build());
        Ok(())
    }
}
