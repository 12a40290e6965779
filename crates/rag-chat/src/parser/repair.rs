use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::markdown;
use super::scanner::{Fragment, JsonFragments};
use crate::utils::error::ParseError;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```json|```").expect("code fence pattern is valid"));

/// Outcome of a lenient parse: a recovered value, or the text as given.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Structured(Value),
    Raw(String),
}

impl Parsed {
    pub fn is_structured(&self) -> bool {
        matches!(self, Parsed::Structured(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Parsed::Structured(v) => Some(v),
            Parsed::Raw(_) => None,
        }
    }

    /// String field `key` of a structured object.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.as_value()?.get(key)?.as_str()
    }
}

impl From<&str> for Parsed {
    fn from(text: &str) -> Self {
        Parsed::Raw(text.to_string())
    }
}

impl From<String> for Parsed {
    fn from(text: String) -> Self {
        Parsed::Raw(text)
    }
}

impl From<Value> for Parsed {
    fn from(value: Value) -> Self {
        Parsed::Structured(value)
    }
}

/// Recovers structured values from backend replies that are fenced,
/// single-quoted, wrapped in prose or cut off mid-object.
///
/// None of the strategies panic. `parse` never fails, `clean_and_parse`
/// yields `None` and `extract_schema` yields [`ParseError::NoMatch`].
pub struct ResponseRepairParser;

impl ResponseRepairParser {
    /// Strict parse after stripping markdown code fences.
    ///
    /// Structured input passes through untouched. Text that does not parse
    /// is returned unchanged as [`Parsed::Raw`].
    pub fn parse(input: impl Into<Parsed>) -> Parsed {
        match input.into() {
            structured @ Parsed::Structured(_) => structured,
            Parsed::Raw(text) => {
                let stripped = CODE_FENCE.replace_all(&text, "");
                match serde_json::from_str::<Value>(stripped.trim()) {
                    Ok(value) => Parsed::Structured(value),
                    Err(e) => {
                        debug!("Response is not valid JSON ({}), keeping raw text", e);
                        Parsed::Raw(text)
                    }
                }
            }
        }
    }

    /// Parse single-quoted, loosely quoted JSON such as
    /// `{'title': 'The "Best" Guide', 'pages': 3}`.
    ///
    /// Single quotes become double quotes, then every `:`/`,` separated
    /// quoted segment has its interior double quotes turned into single
    /// quotes before a strict parse.
    pub fn clean_and_parse(text: &str) -> Option<Value> {
        let normalized = text.replace('\'', "\"");

        let cleaned = normalized
            .split(':')
            .map(|part| {
                if part.contains(',') {
                    part.split(',')
                        .map(Self::requote)
                        .collect::<Vec<_>>()
                        .join(",")
                } else {
                    Self::requote(part)
                }
            })
            .collect::<Vec<_>>()
            .join(":");

        match serde_json::from_str::<Value>(&cleaned) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(operation = "clean_and_parse", line = %cleaned, "JSON decode error: {}", e);
                None
            }
        }
    }

    fn requote(part: &str) -> String {
        let part = part.trim();
        if part.starts_with('"') && part.ends_with('"') {
            let inner = if part.len() >= 2 {
                &part[1..part.len() - 1]
            } else {
                ""
            };
            format!("\"{}\"", inner.replace('"', "'"))
        } else {
            part.to_string()
        }
    }

    /// First object embedded in `text` that satisfies `predicate`.
    ///
    /// Candidates are the top-level brace-balanced fragments, in order. A
    /// candidate that fails to parse alone is appended to the pending
    /// concatenation of earlier failures and that concatenation is retried.
    /// A truncated trailing fragment is repaired first. When a candidate
    /// still fails, scanning resumes just inside its opening brace so the
    /// objects nested in it are tried too.
    pub fn extract_schema<F>(text: &str, predicate: F) -> Result<Value, ParseError>
    where
        F: Fn(&Value) -> bool,
    {
        let mut pending = String::new();

        let mut fragments = JsonFragments::new(text);
        while let Some(fragment) = fragments.next() {
            let candidate = match fragment {
                Fragment::Complete(s) => s.to_string(),
                Fragment::Truncated(s) => Self::repair(s),
            };

            match serde_json::from_str::<Value>(&candidate) {
                Ok(value) => {
                    if predicate(&value) {
                        return Ok(value);
                    }
                }
                Err(_) => {
                    pending.push_str(&candidate);
                    if let Ok(value) = serde_json::from_str::<Value>(&pending) {
                        pending.clear();
                        if predicate(&value) {
                            return Ok(value);
                        }
                        continue;
                    }
                    fragments.rescan_last();
                }
            }
        }

        warn!(operation = "extract_schema", text_len = text.len(), "No fragment matched the expected schema");
        Err(ParseError::NoMatch)
    }

    /// Structural patch for truncated objects.
    ///
    /// Drops line breaks, closes an unterminated string, drops a dangling
    /// `,` or `:` and appends the missing closing braces. Best effort: the
    /// result is not guaranteed to parse, but never has more `{` than `}`.
    pub fn repair(text: &str) -> String {
        let mut out: String = text.chars().filter(|c| *c != '\n' && *c != '\r').collect();
        out.truncate(out.trim_end().len());

        if !out.ends_with('}') {
            if Self::ends_inside_string(&out) {
                out.push('"');
            } else if out.ends_with(',') || out.ends_with(':') {
                out.pop();
                out.truncate(out.trim_end().len());
            }
        }

        let open = out.matches('{').count();
        let close = out.matches('}').count();
        if open > close {
            out.push_str(&"}".repeat(open - close));
        }

        out
    }

    fn ends_inside_string(text: &str) -> bool {
        let mut in_string = false;
        let mut escaped = false;
        for ch in text.chars() {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                _ => {}
            }
        }
        in_string
    }

    /// Try each strategy in turn until one yields a value.
    ///
    /// Order: fenced/strict parse, first embedded object, then (only for
    /// object-looking text) repair followed by quote cleaning.
    pub fn recover(text: &str) -> Parsed {
        if let parsed @ Parsed::Structured(_) = Self::parse(text) {
            return parsed;
        }

        if let Ok(value) = Self::extract_schema(text, Value::is_object) {
            return Parsed::Structured(value);
        }

        let stripped = CODE_FENCE.replace_all(text, "");
        let trimmed = stripped.trim();
        if trimmed.starts_with('{') {
            let repaired = Self::repair(trimmed);
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                return Parsed::Structured(value);
            }
            if let Some(value) = Self::clean_and_parse(&repaired) {
                return Parsed::Structured(value);
            }
        }

        Parsed::Raw(text.to_string())
    }

    /// Render a structured value as nested markdown headings.
    ///
    /// Top-level keys get `depth` `#` marks; depth 0 is rendered as depth 1.
    pub fn render_markdown(value: &Value, depth: usize) -> String {
        markdown::render(value, depth)
    }
}

/// Predicate matching objects whose `field` is a non-empty array of
/// objects that all carry `key`.
pub fn list_field_with_key<'a>(field: &'a str, key: &'a str) -> impl Fn(&Value) -> bool + 'a {
    move |value| match value.get(field).and_then(Value::as_array) {
        Some(items) if !items.is_empty() => items
            .iter()
            .all(|item| item.as_object().is_some_and(|obj| obj.contains_key(key))),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_fenced_json() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(ResponseRepairParser::parse(text), Parsed::Structured(json!({"a": 1})));
    }

    #[test]
    fn test_parse_plain_text_is_unchanged() {
        let text = "The capital of France is Paris.";
        assert_eq!(ResponseRepairParser::parse(text), Parsed::Raw(text.to_string()));
    }

    #[test]
    fn test_parse_is_idempotent() {
        for text in ["```json\n[1, 2]\n```", "not json {", "{\"k\": \"v\"}", ""] {
            let once = ResponseRepairParser::parse(text);
            let twice = ResponseRepairParser::parse(once.clone());
            assert_eq!(once, twice, "input: {:?}", text);
        }
    }

    #[test]
    fn test_parse_serialized_value_roundtrip() {
        let value = json!({"name": "Ada", "tags": ["x", "y"], "nested": {"n": 1.5, "ok": true}});
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(ResponseRepairParser::parse(text), Parsed::Structured(value));
    }

    #[test]
    fn test_parse_passes_structured_through() {
        let value = json!(["already", "parsed"]);
        assert_eq!(
            ResponseRepairParser::parse(value.clone()),
            Parsed::Structured(value)
        );
    }

    #[test]
    fn test_clean_and_parse_single_quotes_with_inner_quotes() {
        let text = r#"{'name': 'John "Johnny" Doe', 'age': 30}"#;
        let value = ResponseRepairParser::clean_and_parse(text).unwrap();
        assert_eq!(value, json!({"name": "John 'Johnny' Doe", "age": 30}));
    }

    #[test]
    fn test_clean_and_parse_metadata_line() {
        let text = "{'source': 'handbook', 'chapter': 'intro'}";
        let value = ResponseRepairParser::clean_and_parse(text).unwrap();
        assert_eq!(value["source"], "handbook");
        assert_eq!(value["chapter"], "intro");
    }

    #[test]
    fn test_clean_and_parse_failure_returns_none() {
        assert!(ResponseRepairParser::clean_and_parse("{'unterminated': ").is_none());
        assert!(ResponseRepairParser::clean_and_parse("just words").is_none());
    }

    #[test]
    fn test_extract_schema_skips_non_matching_fragments() {
        let text = r#"Here you go: {"note": "draft"} and the result {"questions": [{"question": "Why?"}]} done"#;
        let value =
            ResponseRepairParser::extract_schema(text, list_field_with_key("questions", "question"))
                .unwrap();
        assert_eq!(value["questions"][0]["question"], "Why?");
    }

    #[test]
    fn test_extract_schema_no_match() {
        let text = r#"{"a": 1} {"b": 2}"#;
        let result = ResponseRepairParser::extract_schema(text, |v| v.get("c").is_some());
        assert_eq!(result, Err(ParseError::NoMatch));
        assert_eq!(
            ResponseRepairParser::extract_schema("no braces at all", |_| true),
            Err(ParseError::NoMatch)
        );
    }

    #[test]
    fn test_extract_schema_repairs_truncated_tail() {
        let text = r#"Sure! {"answer": "42", "sources": {"doc": "guide""#;
        let value = ResponseRepairParser::extract_schema(text, |v| v.get("answer").is_some()).unwrap();
        assert_eq!(value["answer"], "42");
        assert_eq!(value["sources"]["doc"], "guide");
    }

    #[test]
    fn test_extract_schema_survives_stray_open_brace() {
        let text = r#"Use a { to open an object. Result: {"answer": "2"}"#;
        let value = ResponseRepairParser::extract_schema(text, |v| v.get("answer").is_some()).unwrap();
        assert_eq!(value["answer"], "2");
    }

    #[test]
    fn test_extract_schema_looks_inside_unparseable_fragment() {
        let text = r#"{not json, but {"answer": "inner"} is} trailing"#;
        let value = ResponseRepairParser::extract_schema(text, |v| v.get("answer").is_some()).unwrap();
        assert_eq!(value["answer"], "inner");
    }

    #[test]
    fn test_repair_closes_truncated_object() {
        assert_eq!(ResponseRepairParser::repair(r#"{"a": 1, "b": 2"#), r#"{"a": 1, "b": 2}"#);
    }

    #[test]
    fn test_repair_strips_newlines_and_dangling_separator() {
        let repaired = ResponseRepairParser::repair("{\n\"a\": {\"b\": 1},\r\n");
        assert_eq!(repaired, r#"{"a": {"b": 1}}"#);
        assert!(serde_json::from_str::<Value>(&repaired).is_ok());
    }

    #[test]
    fn test_repair_closes_open_string() {
        let repaired = ResponseRepairParser::repair(r#"{"a": "hel"#);
        assert_eq!(repaired, r#"{"a": "hel"}"#);
    }

    #[test]
    fn test_repair_never_leaves_more_open_braces() {
        for text in ["{", "{{{", "{\"a\": {\"b\": {", "}", "abc", "", "{\"x\": 1}"] {
            let repaired = ResponseRepairParser::repair(text);
            let open = repaired.matches('{').count();
            let close = repaired.matches('}').count();
            assert!(open <= close, "input {:?} gave {:?}", text, repaired);
        }
    }

    #[test]
    fn test_recover_escalates() {
        let truncated = r#"{"answer": "yes", "confidence": 0.9"#;
        assert_eq!(
            ResponseRepairParser::recover(truncated).str_field("answer"),
            Some("yes")
        );

        let quoted = "{'answer': 'maybe'}";
        assert_eq!(ResponseRepairParser::recover(quoted).str_field("answer"), Some("maybe"));

        let prose = "I don't know.";
        assert_eq!(ResponseRepairParser::recover(prose), Parsed::Raw(prose.to_string()));
    }

    #[test]
    fn test_list_field_with_key() {
        let pred = list_field_with_key("items", "id");
        assert!(pred(&json!({"items": [{"id": 1}, {"id": 2}]})));
        assert!(!pred(&json!({"items": [{"id": 1}, {"name": "x"}]})));
        assert!(!pred(&json!({"items": []})));
        assert!(!pred(&json!({"other": [{"id": 1}]})));
    }
}
