use serde_json::Value;

/// Render `value` as markdown, starting with headings of level `depth`.
///
/// Object keys become headings (`#` repeated `depth` times) and their
/// values are rendered one level deeper. Scalars become paragraphs and
/// scalar array items become `- item` bullets. A `depth` of 0 is treated
/// as 1, since a heading needs at least one `#`.
pub fn render(value: &Value, depth: usize) -> String {
    let mut out = String::new();
    render_into(&mut out, value, depth.max(1));
    out
}

fn render_into(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                out.push_str(&"#".repeat(depth));
                out.push(' ');
                out.push_str(&title(key));
                out.push_str("\n\n");
                render_into(out, child, depth + 1);
            }
        }
        Value::Array(items) => {
            let mut in_list = false;
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        if in_list {
                            out.push('\n');
                            in_list = false;
                        }
                        render_into(out, item, depth + 1);
                    }
                    Value::Null => {}
                    scalar => {
                        out.push_str("- ");
                        out.push_str(&scalar_text(scalar));
                        out.push('\n');
                        in_list = true;
                    }
                }
            }
            if in_list {
                out.push('\n');
            }
        }
        Value::Null => {}
        scalar => {
            out.push_str(&scalar_text(scalar));
            out.push_str("\n\n");
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Human heading for a key: `APISecurityPolicy` → `API Security Policy`,
/// `post_incident-review` → `Post Incident Review`. Keys that already
/// contain spaces are kept as written.
pub fn title(key: &str) -> String {
    if key.contains(' ') {
        return key.to_string();
    }

    key.split(['_', '-'])
        .filter(|part| !part.is_empty())
        .flat_map(split_camel)
        .map(|word| capitalize(&word))
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_camel(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &ch) in chars.iter().enumerate() {
        if i > 0 && ch.is_uppercase() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(ch);
    }

    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Compact listing of an object of arrays: `**key**` followed by one
/// tab-indented bullet per item. Returns `None` for non-objects.
pub fn render_bullet_lists(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    let mut out = String::new();
    for (key, items) in map {
        out.push_str(&format!("**{}**\n", key));
        match items {
            Value::Array(items) => {
                for item in items {
                    out.push_str(&format!("\t- {}\n", scalar_text(item)));
                }
            }
            other => out.push_str(&format!("\t- {}\n", scalar_text(other))),
        }
    }
    Some(out)
}
