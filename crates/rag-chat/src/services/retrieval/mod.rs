//! Retrieval parameters and the default in-memory vector index.

mod memory;
mod params;

pub use memory::{InMemoryCollection, InMemoryIndex};
pub use params::{SearchMode, SearchParams};
