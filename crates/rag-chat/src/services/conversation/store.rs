use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::chat::{ChatMessage, Role};

/// Ordered log of the turns exchanged in one session.
///
/// Order always matches turn order. Only `append`, `modify`, `clear` and
/// the compactor change it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn append(&mut self, role: Role, text: impl Into<String>) {
        self.messages.push(ChatMessage::new(role, text));
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Positional keep/drop.
    ///
    /// * `None`: nothing happens.
    /// * `0`: the whole history is cleared.
    /// * `n > 0`: the first `n` messages are dropped.
    /// * `n < 0`: only the first `len + n` messages are kept.
    ///
    /// Returns `false` without touching the history when `n` is `None` or
    /// `|n|` exceeds the number of messages.
    pub fn modify(&mut self, n: Option<i64>) -> bool {
        let Some(n) = n else {
            debug!("modify called without a count, history unchanged");
            return false;
        };

        let len = self.messages.len();
        let magnitude = n.unsigned_abs();
        if magnitude > len as u64 {
            debug!("modify({}) out of range for {} messages, history unchanged", n, len);
            return false;
        }
        let magnitude = magnitude as usize;

        if n == 0 {
            self.messages.clear();
        } else if n > 0 {
            self.messages.drain(..magnitude);
        } else {
            self.messages.truncate(len - magnitude);
        }

        debug!("modify({}) left {} of {} messages", n, self.messages.len(), len);
        true
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// One numbered line per message, starting at 1: `"1. user: hi"`.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .enumerate()
            .map(|(i, msg)| format!("{}. {}\n", i + 1, msg))
            .collect()
    }

    /// Write the transcript to `dir/chat_history_YYYYmmdd_HHMMSS.md`.
    pub fn save_transcript(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create history directory {:?}", dir))?;

        let file_name = format!("chat_history_{}.md", Local::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(file_name);

        fs::write(&path, self.transcript())
            .with_context(|| format!("Failed to write transcript {:?}", path))?;

        info!("Saved {} messages to {:?}", self.messages.len(), path);
        Ok(path)
    }
}
