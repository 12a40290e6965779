pub mod command;
pub mod error;
pub mod similarity;
pub mod url;

pub use error::{ChatError, ChatResult, ParseError};
pub use similarity::cosine_similarity;
