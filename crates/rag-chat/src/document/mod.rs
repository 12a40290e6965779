//! Turning files, web pages and source trees into chunks.

pub mod chunker;
pub mod html;
pub mod loader;
pub mod source;
pub mod web;

use std::fmt;
use std::str::FromStr;

use crate::utils::error::ChatError;

pub use chunker::{Chunk, TextChunker};
pub use loader::{load_path, LoadOptions};
pub use source::{clone_repository, load_source_tree, DEFAULT_EXCLUDES};
pub use web::load_web_page;

/// Where a retrieval collection's documents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Text,
    Markdown,
    Json,
    Pdf,
    Web,
    Python,
}

impl SourceKind {
    /// File extension read from disk; `None` for web pages.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::Text => Some("txt"),
            Self::Markdown => Some("md"),
            Self::Json => Some("json"),
            Self::Pdf => Some("pdf"),
            Self::Python => Some("py"),
            Self::Web => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "txt",
            Self::Markdown => "md",
            Self::Json => "json",
            Self::Pdf => "pdf",
            Self::Web => "web",
            Self::Python => "python",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "txt" | "text" => Ok(Self::Text),
            "md" | "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "pdf" => Ok(Self::Pdf),
            "web" | "url" => Ok(Self::Web),
            "python" | "py" => Ok(Self::Python),
            other => Err(ChatError::Validation(format!("unknown source type '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!("TXT".parse::<SourceKind>().unwrap(), SourceKind::Text);
        assert_eq!("python".parse::<SourceKind>().unwrap(), SourceKind::Python);
        assert_eq!(SourceKind::Web.extension(), None);
        assert!("docx".parse::<SourceKind>().is_err());
    }
}
