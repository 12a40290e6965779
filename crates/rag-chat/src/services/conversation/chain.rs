use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::providers::{LlmProvider, RetrievalHandle};
use crate::models::chat::ChatMessage;
use crate::models::document::RetrievalChunk;
use crate::parser::{Parsed, ResponseRepairParser};
use crate::services::retrieval::SearchParams;
use crate::utils::error::{ChatError, ChatResult};

pub const DEFAULT_CHAT_PROMPT: &str =
    "You are a helpful assistant. Answer all questions to the best of your ability.";

pub const DEFAULT_RETRIEVAL_PROMPT: &str = "Answer the user's questions based on the below context. If the context doesn't contain any relevant information to the question, don't make something up and just say \"I don't know\":\n\n<context>\n{context}\n</context>";

pub const CONDENSE_INSTRUCTION: &str = "Given the above conversation, generate a search query to look up to get information relevant to the conversation";

const CONTEXT_SLOT: &str = "{context}";
const CONTEXT_BLOCK: &str = "\n\n<context>\n{context}\n</context>";

/// What a session answers with: the bare backend, or the backend grounded
/// in a retrieval collection.
#[derive(Clone)]
pub enum ChainStrategy {
    Plain {
        system_template: Option<String>,
    },
    Retrieval {
        handle: Arc<dyn RetrievalHandle>,
        search: SearchParams,
        template: Option<String>,
    },
}

impl ChainStrategy {
    pub fn plain() -> Self {
        Self::Plain {
            system_template: None,
        }
    }

    pub fn retrieval(handle: Arc<dyn RetrievalHandle>, search: SearchParams) -> Self {
        Self::Retrieval {
            handle,
            search,
            template: None,
        }
    }

    pub fn handle(&self) -> Option<&Arc<dyn RetrievalHandle>> {
        match self {
            Self::Plain { .. } => None,
            Self::Retrieval { handle, .. } => Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain { .. } => "plain",
            Self::Retrieval { .. } => "retrieval",
        }
    }
}

impl std::fmt::Debug for ChainStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain { system_template } => f
                .debug_struct("Plain")
                .field("system_template", system_template)
                .finish(),
            Self::Retrieval {
                handle,
                search,
                template,
            } => f
                .debug_struct("Retrieval")
                .field("collection", &handle.collection_name())
                .field("search", search)
                .field("template", template)
                .finish(),
        }
    }
}

/// Result of one chain run. The caller records `turns()` into its history.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub prompt: String,
    pub answer: String,
    /// Query actually sent to retrieval, when retrieval ran.
    pub standalone_query: Option<String>,
    pub chunks: Vec<RetrievalChunk>,
    pub timings: ChainTimings,
}

impl ChainOutput {
    pub fn turns(&self) -> [ChatMessage; 2] {
        [
            ChatMessage::user(self.prompt.clone()),
            ChatMessage::assistant(self.answer.clone()),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChainTimings {
    pub condense: Option<Duration>,
    pub retrieval: Option<Duration>,
    pub generation: Duration,
}

/// A prepared chain. Built once per session.
pub enum ConversationChain {
    Plain(PlainChain),
    Retrieval(RetrievalChain),
}

impl ConversationChain {
    pub fn build(strategy: &ChainStrategy, backend: Arc<dyn LlmProvider>) -> ChatResult<Self> {
        match strategy {
            ChainStrategy::Plain { system_template } => Ok(Self::Plain(PlainChain::new(
                backend,
                system_template.as_deref().unwrap_or(DEFAULT_CHAT_PROMPT),
            ))),
            ChainStrategy::Retrieval {
                handle,
                search,
                template,
            } => Ok(Self::Retrieval(RetrievalChain::new(
                backend,
                handle.clone(),
                *search,
                template.as_deref().unwrap_or(DEFAULT_RETRIEVAL_PROMPT),
            )?)),
        }
    }

    /// Answer `prompt` given `history`. Nothing is recorded here.
    pub async fn invoke(&self, prompt: &str, history: &[ChatMessage]) -> ChatResult<ChainOutput> {
        match self {
            Self::Plain(chain) => chain.invoke(prompt, history).await,
            Self::Retrieval(chain) => chain.invoke(prompt, history).await,
        }
    }
}

/// System prompt + history + user turn, no retrieval.
pub struct PlainChain {
    backend: Arc<dyn LlmProvider>,
    system_prompt: String,
}

impl PlainChain {
    pub fn new(backend: Arc<dyn LlmProvider>, system_prompt: impl Into<String>) -> Self {
        Self {
            backend,
            system_prompt: system_prompt.into(),
        }
    }

    pub async fn invoke(&self, prompt: &str, history: &[ChatMessage]) -> ChatResult<ChainOutput> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(prompt));

        let started = Instant::now();
        let reply = self
            .backend
            .generate(&messages)
            .await
            .map_err(|e| ChatError::from_backend("generate", e))?;

        Ok(ChainOutput {
            prompt: prompt.to_string(),
            answer: reply.trim().to_string(),
            standalone_query: None,
            chunks: Vec::new(),
            timings: ChainTimings {
                generation: started.elapsed(),
                ..ChainTimings::default()
            },
        })
    }
}

/// Condense → retrieve → grounded synthesis.
pub struct RetrievalChain {
    backend: Arc<dyn LlmProvider>,
    handle: Arc<dyn RetrievalHandle>,
    search: SearchParams,
    system_template: String,
}

impl RetrievalChain {
    /// Fails with a validation error when `search` is invalid.
    pub fn new(
        backend: Arc<dyn LlmProvider>,
        handle: Arc<dyn RetrievalHandle>,
        search: SearchParams,
        template: &str,
    ) -> ChatResult<Self> {
        search.validate()?;
        Ok(Self {
            backend,
            handle,
            search,
            system_template: with_context_slot(template),
        })
    }

    pub fn system_template(&self) -> &str {
        &self.system_template
    }

    /// Rewrite `prompt` into a standalone search query using `history`.
    ///
    /// With no history the prompt is already standalone and no backend
    /// call is made.
    pub async fn condense(&self, prompt: &str, history: &[ChatMessage]) -> ChatResult<String> {
        if history.is_empty() {
            return Ok(prompt.to_string());
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(prompt));
        messages.push(ChatMessage::user(CONDENSE_INSTRUCTION));

        let query = self
            .backend
            .generate(&messages)
            .await
            .map_err(|e| ChatError::from_backend("condense", e))?;

        let query = query.trim();
        if query.is_empty() {
            warn!("Backend returned an empty search query, falling back to the prompt");
            return Ok(prompt.to_string());
        }
        Ok(query.to_string())
    }

    /// Messages for the synthesis call.
    pub fn build_messages(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        chunks: &[RetrievalChunk],
    ) -> Vec<ChatMessage> {
        let context = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(
            self.system_template.replace(CONTEXT_SLOT, &context),
        ));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(prompt));
        messages
    }

    pub async fn invoke(&self, prompt: &str, history: &[ChatMessage]) -> ChatResult<ChainOutput> {
        let started = Instant::now();
        let query = self.condense(prompt, history).await?;
        let condense_time = (!history.is_empty()).then(|| started.elapsed());
        debug!("Standalone query: {}", query);

        let retrieval_started = Instant::now();
        let chunks = self
            .handle
            .retrieve(&query, &self.search)
            .await
            .map_err(|e| ChatError::from_backend("retrieve", e))?;
        let retrieval_time = retrieval_started.elapsed();
        info!(
            "Retrieved {} chunks from '{}' (mode={}, k={})",
            chunks.len(),
            self.handle.collection_name(),
            self.search.mode,
            self.search.k
        );

        let messages = self.build_messages(prompt, history, &chunks);

        let generation_started = Instant::now();
        let reply = self
            .backend
            .generate(&messages)
            .await
            .map_err(|e| ChatError::from_backend("synthesize", e))?;

        Ok(ChainOutput {
            prompt: prompt.to_string(),
            answer: extract_answer(&reply),
            standalone_query: Some(query),
            chunks,
            timings: ChainTimings {
                condense: condense_time,
                retrieval: Some(retrieval_time),
                generation: generation_started.elapsed(),
            },
        })
    }
}

/// Make sure `template` has a `{context}` slot, appending a context block
/// when it does not.
pub fn with_context_slot(template: &str) -> String {
    if template.contains(CONTEXT_SLOT) {
        template.to_string()
    } else {
        format!("{}{}", template, CONTEXT_BLOCK)
    }
}

/// The `answer` field when the reply is (or embeds) an object carrying a
/// string answer, otherwise the reply text.
fn extract_answer(reply: &str) -> String {
    let recovered = match ResponseRepairParser::parse(reply) {
        structured @ Parsed::Structured(_) => structured,
        Parsed::Raw(_) if reply.contains("\"answer\"") => ResponseRepairParser::recover(reply),
        raw => raw,
    };

    match recovered.str_field("answer") {
        Some(answer) => answer.trim().to_string(),
        None => reply.trim().to_string(),
    }
}
