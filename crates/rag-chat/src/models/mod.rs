pub mod chat;
pub mod document;

pub use chat::{ChatMessage, Role, SessionId};
pub use document::{Document, RetrievalChunk};
