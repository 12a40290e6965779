//! Conversation core: history, compaction, chains and sessions.

pub mod chain;
pub mod compactor;
pub mod providers;
pub mod registry;
pub mod session;
pub mod store;

pub use chain::{ChainOutput, ChainStrategy, ConversationChain};
pub use compactor::HistoryCompactor;
pub use providers::{EmbeddingProvider, LlmProvider, RetrievalHandle, VectorIndex};
pub use registry::{SessionRegistry, SharedSession};
pub use session::ConversationSession;
pub use store::MessageStore;
