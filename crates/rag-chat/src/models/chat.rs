use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Speaker of a chat turn.
///
/// `System` only ever appears in prompts sent to a backend; stored
/// histories hold user and assistant turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Display length in grapheme clusters, used for log previews.
    pub fn grapheme_len(&self) -> usize {
        self.content.graphemes(true).count()
    }

    /// First `max` graphemes of the content, with an ellipsis when cut.
    pub fn preview(&self, max: usize) -> String {
        let mut out: String = self.content.graphemes(true).take(max).collect();
        if self.grapheme_len() > max {
            out.push('…');
        }
        out
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = ChatMessage::assistant("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hello"}"#);
    }

    #[test]
    fn test_display() {
        assert_eq!(ChatMessage::user("hi").to_string(), "user: hi");
    }

    #[test]
    fn test_preview_cuts_on_graphemes() {
        let msg = ChatMessage::user("héllo wörld");
        assert_eq!(msg.preview(5), "héllo…");
        assert_eq!(msg.preview(50), "héllo wörld");
    }
}
