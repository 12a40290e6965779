use anyhow::{anyhow, Context, Result};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use lopdf::Document as PdfDocument;
use pulldown_cmark::{html, Options, Parser as MdParser};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::html::extract_text_from_html;
use super::SourceKind;
use crate::models::document::Document;
use crate::parser::ResponseRepairParser;
use crate::utils::error::{ChatError, ParseError};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Overwrite non-ASCII bytes with spaces instead of refusing the file.
    pub auto_clean: bool,
}

/// Load a single file, or every matching file under a directory.
pub fn load_path(kind: SourceKind, path: &Path, options: LoadOptions) -> Result<Vec<Document>> {
    let Some(extension) = kind.extension() else {
        return Err(ChatError::Validation(format!("{} sources are not loaded from disk", kind)).into());
    };
    if !path.exists() {
        return Err(ChatError::Validation(format!(
            "Invalid path: {}. No such file or directory.",
            path.display()
        ))
        .into());
    }

    let files = if path.is_dir() {
        find_files(path, extension)?
    } else if has_extension(path, extension) {
        vec![path.to_path_buf()]
    } else {
        return Err(ChatError::Validation(format!(
            "{} is not a .{} file",
            path.display(),
            extension
        ))
        .into());
    };

    let mut documents = Vec::new();
    for file in &files {
        if matches!(kind, SourceKind::Text | SourceKind::Json) {
            check_ascii(file, options.auto_clean)?;
        }
        let mut loaded = match kind {
            SourceKind::Text => vec![load_text(file)?],
            SourceKind::Markdown => vec![load_markdown(file)?],
            SourceKind::Json => vec![load_json(file)?],
            SourceKind::Pdf => load_pdf(file)?,
            SourceKind::Python => vec![load_plain(file)?.with_metadata("language", "python")],
            SourceKind::Web => {
                return Err(ChatError::Validation("web pages are fetched, not read".to_string()).into())
            }
        };
        documents.append(&mut loaded);
    }

    info!(
        "Loaded {} documents from {} {} file(s) under {}",
        documents.len(),
        files.len(),
        kind,
        path.display()
    );
    Ok(documents)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Files under `dir` matching `**/*.{extension}`, sorted.
pub fn find_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let root = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = format!("{}/**/*.{}", root, extension);

    let mut files = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| format!("Bad glob pattern {}", pattern))? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable path: {}", e),
        }
    }
    files.sort();
    Ok(files)
}

/// Offsets and values of every byte above 0x7F.
pub fn find_non_ascii_bytes(data: &[u8]) -> Vec<(usize, u8)> {
    data.iter()
        .enumerate()
        .filter(|(_, byte)| **byte > 0x7F)
        .map(|(i, byte)| (i, *byte))
        .collect()
}

/// Rewrite `path` with every non-ASCII byte replaced by a space. Returns
/// the number of bytes replaced.
pub fn clean_non_ascii_bytes(path: &Path) -> Result<usize> {
    let mut data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut replaced = 0;
    for byte in data.iter_mut().filter(|b| **b > 0x7F) {
        *byte = b' ';
        replaced += 1;
    }
    fs::write(path, &data).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(replaced)
}

fn check_ascii(path: &Path, auto_clean: bool) -> Result<()> {
    debug!("Checking file: {} for non-ASCII bytes", path.display());
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let positions = find_non_ascii_bytes(&data);
    if positions.is_empty() {
        return Ok(());
    }

    warn!(
        "Non-ASCII bytes found in file: {} (first at offset {})",
        path.display(),
        positions[0].0
    );
    if !auto_clean {
        return Err(ChatError::Validation(format!(
            "Non-ASCII bytes found in file: {}. Clean the file or enable auto_clean.",
            path.display()
        ))
        .into());
    }

    let replaced = clean_non_ascii_bytes(path)?;
    info!("Replaced {} non-ASCII bytes in {}", replaced, path.display());
    Ok(())
}

/// Decode bytes, honouring a BOM and falling back to Windows-1252.
pub fn decode_text(bytes: &[u8]) -> (String, &'static Encoding) {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return (text.into_owned(), encoding);
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), UTF_8);
    }
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    (text.into_owned(), WINDOWS_1252)
}

fn read_decoded(path: &Path) -> Result<(String, &'static Encoding)> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(decode_text(&raw))
}

fn load_plain(path: &Path) -> Result<Document> {
    let (content, encoding) = read_decoded(path)?;
    Ok(Document::new(content)
        .with_source(path.display().to_string())
        .with_metadata("encoding", encoding.name()))
}

/// Plain text. A first line holding a `{...}` object becomes metadata and
/// is dropped from the content.
pub fn load_text(path: &Path) -> Result<Document> {
    let mut document = load_plain(path)?;
    extract_first_line_metadata(&mut document)?;
    Ok(document)
}

pub fn extract_first_line_metadata(document: &mut Document) -> Result<bool> {
    let first_line = document.content.split('\n').next().unwrap_or_default();
    let first_line = first_line.trim_end_matches('\r');
    if !(first_line.starts_with('{') && first_line.ends_with('}')) {
        return Ok(false);
    }

    match ResponseRepairParser::clean_and_parse(first_line) {
        Some(Value::Object(metadata)) => {
            info!("Metadata found in document: {:?}", metadata);
            document.metadata.extend(metadata);
            document.content = match document.content.split_once('\n') {
                Some((_, rest)) => rest.to_string(),
                None => String::new(),
            };
            Ok(true)
        }
        _ => {
            error!("Line: {}", first_line);
            Err(ChatError::Parse(ParseError::Invalid(first_line.to_string())).into())
        }
    }
}

/// Markdown rendered to HTML, then reduced to its text.
pub fn load_markdown(path: &Path) -> Result<Document> {
    let (content, encoding) = read_decoded(path)?;

    let parser = MdParser::new_ext(&content, Options::all());
    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);

    Ok(Document::new(extract_text_from_html(&html_output))
        .with_source(path.display().to_string())
        .with_metadata("encoding", encoding.name()))
}

/// The whole JSON value, re-serialized.
pub fn load_json(path: &Path) -> Result<Document> {
    let (content, _) = read_decoded(path)?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(Document::new(value.to_string()).with_source(path.display().to_string()))
}

/// One document per page that has extractable text.
pub fn load_pdf(path: &Path) -> Result<Vec<Document>> {
    let doc = PdfDocument::load(path)
        .map_err(|e| anyhow!("Failed to load PDF file {}: {}", path.display(), e))?;
    let pages = doc.get_pages();
    let total_pages = pages.len();

    let mut documents = Vec::with_capacity(total_pages);
    for (index, page_num) in pages.keys().enumerate() {
        match doc.extract_text(&[*page_num]) {
            Ok(text) if !text.trim().is_empty() => documents.push(
                Document::new(text)
                    .with_source(path.display().to_string())
                    .with_metadata("page", index)
                    .with_metadata("total_pages", total_pages),
            ),
            Ok(_) => debug!("Page {} of {} has no text", page_num, path.display()),
            Err(e) => warn!("Failed to extract text from page {}: {}", page_num, e),
        }
    }
    Ok(documents)
}
