use serde_json::Value;

use crate::models::document::{Document, RetrievalChunk};
use crate::utils::error::{ChatError, ChatResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub start_pos: usize,
    pub end_pos: usize,
}

/// Character-window splitter that prefers to cut at line breaks, then at
/// whitespace, when one falls in the back half of the window.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    /// `chunk_size` must be positive and larger than `chunk_overlap`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> ChatResult<Self> {
        if chunk_size == 0 {
            return Err(ChatError::Validation("chunk_size must be > 0".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(ChatError::Validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total_len = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total_len {
            let hard_end = (start + self.chunk_size).min(total_len);
            let end = if hard_end < total_len {
                boundary(&chars, start, hard_end)
            } else {
                hard_end
            };

            let content: String = chars[start..end].iter().collect();
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                chunks.push(Chunk {
                    content: trimmed.to_string(),
                    start_pos: start,
                    end_pos: end,
                });
            }

            if end >= total_len {
                break;
            }
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }

        chunks
    }

    /// Split every document, copying its metadata onto each chunk.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<RetrievalChunk> {
        documents
            .iter()
            .flat_map(|doc| {
                self.chunk(&doc.content).into_iter().map(move |chunk| {
                    let mut metadata = doc.metadata.clone();
                    metadata.insert("start_index".to_string(), Value::from(chunk.start_pos));
                    RetrievalChunk {
                        content: chunk.content,
                        metadata,
                        score: None,
                    }
                })
            })
            .collect()
    }
}

fn boundary(chars: &[char], start: usize, end: usize) -> usize {
    let floor = (start + (end - start) / 2).max(start + 1);
    let separators: [fn(char) -> bool; 2] = [|c| c == '\n', char::is_whitespace];

    for is_separator in separators {
        if let Some(pos) = (floor..end).rev().find(|&i| is_separator(chars[i])) {
            return pos + 1;
        }
    }
    end
}
