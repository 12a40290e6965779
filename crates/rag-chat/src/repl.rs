//! Line commands understood by the interactive chat loop.

use crate::models::chat::ChatMessage;

pub const HELP: &str = "Commands:
  /exit              leave the chat
  /reset             clear the chat history
  /history           show the chat history
  /delete <n>        delete n messages: positive from the start, negative from the end (e.g. /delete 3, /delete -4)
  /summarize         replace the history with a summary
  /save              write the history to history/chat_history_<timestamp>.md
  /help              show this help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Exit,
    Reset,
    History,
    /// `None` when the count is missing or not a number.
    Delete(Option<i64>),
    Summarize,
    Save,
    Help,
    Ask(String),
    Empty,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        match parts.next() {
            None => Self::Empty,
            Some("/exit") | Some("/quit") => Self::Exit,
            Some("/reset") => Self::Reset,
            Some("/history") => Self::History,
            Some("/delete") => Self::Delete(parts.next().and_then(|n| n.parse().ok())),
            Some("/summarize") => Self::Summarize,
            Some("/save") => Self::Save,
            Some("/help") => Self::Help,
            Some(_) => Self::Ask(line.to_string()),
        }
    }

    /// Commands after which the history is shown again.
    pub fn shows_history(&self) -> bool {
        matches!(
            self,
            Self::Reset | Self::History | Self::Delete(Some(_)) | Self::Summarize
        )
    }
}

pub fn format_history(messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return "No chat history.".to_string();
    }
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| format!("{}. {}", i + 1, m))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ReplCommand::parse("/exit"), ReplCommand::Exit);
        assert_eq!(ReplCommand::parse("  /reset "), ReplCommand::Reset);
        assert_eq!(ReplCommand::parse("/delete -4"), ReplCommand::Delete(Some(-4)));
        assert_eq!(ReplCommand::parse("/delete"), ReplCommand::Delete(None));
        assert_eq!(ReplCommand::parse("/delete three"), ReplCommand::Delete(None));
        assert_eq!(ReplCommand::parse(""), ReplCommand::Empty);
        assert_eq!(
            ReplCommand::parse("what is rust?"),
            ReplCommand::Ask("what is rust?".to_string())
        );
        assert!(ReplCommand::parse("/summarize").shows_history());
        assert!(!ReplCommand::parse("/save").shows_history());
    }

    #[test]
    fn test_format_history() {
        assert_eq!(format_history(&[]), "No chat history.");
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        assert_eq!(format_history(&history), "1. user: hi\n2. assistant: hello");
    }
}
