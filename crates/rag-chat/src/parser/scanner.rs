/// A brace-delimited slice found by [`JsonFragments`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment<'a> {
    /// Braces balanced, from the opening `{` to its matching `}`.
    Complete(&'a str),
    /// Text ran out before the outermost `{` was closed.
    Truncated(&'a str),
}

impl<'a> Fragment<'a> {
    pub fn as_str(&self) -> &'a str {
        match self {
            Fragment::Complete(s) | Fragment::Truncated(s) => s,
        }
    }
}

/// Streaming scanner over the top-level `{ ... }` fragments of noisy text.
///
/// Depth counting ignores braces inside JSON strings (escape aware), so
/// `{"a": "}"}` is a single fragment. Text between fragments is skipped.
pub struct JsonFragments<'a> {
    text: &'a str,
    pos: usize,
    last_start: Option<usize>,
    done: bool,
}

impl<'a> JsonFragments<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            last_start: None,
            done: false,
        }
    }

    /// Resume scanning one byte past the opening brace of the last fragment.
    ///
    /// Used when that fragment did not parse: a stray `{` in prose would
    /// otherwise hide every object after it.
    pub fn rescan_last(&mut self) {
        if let Some(start) = self.last_start.take() {
            self.pos = start + 1;
            self.done = false;
        }
    }
}

impl<'a> Iterator for JsonFragments<'a> {
    type Item = Fragment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let text = self.text;
        let base = self.pos;
        let rest = &text[base..];

        let mut start: Option<usize> = None;
        let mut depth: i32 = 0;
        let mut in_string = false;
        let mut escaped = false;

        for (i, ch) in rest.char_indices() {
            if start.is_none() {
                if ch == '{' {
                    start = Some(i);
                    depth = 1;
                }
                continue;
            }

            if in_string {
                if escaped {
                    escaped = false;
                    continue;
                }
                match ch {
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }

            match ch {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let st = start?;
                        self.pos = base + i + 1;
                        self.last_start = Some(base + st);
                        return Some(Fragment::Complete(&rest[st..=i]));
                    }
                }
                _ => {}
            }
        }

        self.done = true;
        self.last_start = start.map(|st| base + st);
        start.map(|st| Fragment::Truncated(&rest[st..]))
    }
}

/// First balanced `{ ... }` object in `s`, if any.
pub fn first_json_object(s: &str) -> Option<&str> {
    JsonFragments::new(s).find_map(|fragment| match fragment {
        Fragment::Complete(obj) => Some(obj),
        Fragment::Truncated(_) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_fragments_in_order() {
        let text = r#"noise {"a": 1} more {"b": {"c": 2}} tail"#;
        let found: Vec<_> = JsonFragments::new(text).collect();
        assert_eq!(
            found,
            vec![
                Fragment::Complete(r#"{"a": 1}"#),
                Fragment::Complete(r#"{"b": {"c": 2}}"#),
            ]
        );
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let text = r#"{"a": "}{", "b": "quote \" }"}"#;
        assert_eq!(first_json_object(text), Some(text));
    }

    #[test]
    fn test_truncated_tail_is_reported() {
        let text = r#"{"ok": true} {"cut": [1, 2"#;
        let found: Vec<_> = JsonFragments::new(text).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1], Fragment::Truncated(r#"{"cut": [1, 2"#));
    }

    #[test]
    fn test_rescan_finds_object_after_stray_brace() {
        let text = r#"a { b {"x": 1}"#;
        let mut fragments = JsonFragments::new(text);
        assert_eq!(fragments.next(), Some(Fragment::Truncated(r#"{ b {"x": 1}"#)));
        assert_eq!(fragments.next(), None);

        fragments.rescan_last();
        assert_eq!(fragments.next(), Some(Fragment::Complete(r#"{"x": 1}"#)));
        assert_eq!(fragments.next(), None);
    }

    #[test]
    fn test_no_object() {
        assert_eq!(first_json_object("plain text"), None);
        assert_eq!(JsonFragments::new("").count(), 0);
    }

    #[test]
    fn test_multibyte_text_around_fragments() {
        let text = "résumé → {\"nom\": \"café\"} ✓";
        assert_eq!(first_json_object(text), Some("{\"nom\": \"café\"}"));
    }
}
