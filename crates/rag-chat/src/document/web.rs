use anyhow::{bail, Context, Result};
use reqwest::Client;
use scraper::Html;
use tracing::{debug, info};

use super::html::{extract_text_from_html, select_attr, select_text};
use crate::models::document::Document;
use crate::utils::error::ChatError;
use crate::utils::url::is_valid_url;

/// Fetch `url` and turn the page into one document.
///
/// Metadata carries `source`, and `title`, `description` and `language`
/// when the page declares them.
pub async fn load_web_page(client: &Client, url: &str) -> Result<Document> {
    if !is_valid_url(url) {
        return Err(ChatError::Validation(format!("Invalid URL provided: {}", url)).into());
    }

    debug!("Fetching {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    if !response.status().is_success() {
        bail!("Fetching {} failed with status {}", url, response.status());
    }

    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read body of {}", url))?;

    let document = page_document(url, &body);
    info!("Loaded {} ({} chars)", url, document.content.len());
    Ok(document)
}

fn page_document(url: &str, body: &str) -> Document {
    let parsed = Html::parse_document(body);
    let mut document = Document::new(extract_text_from_html(body)).with_source(url);

    if let Some(title) = select_text(&parsed, "title") {
        document = document.with_metadata("title", title);
    }
    if let Some(description) = select_attr(&parsed, "meta[name=description]", "content") {
        document = document.with_metadata("description", description);
    }
    if let Some(language) = select_attr(&parsed, "html", "lang") {
        document = document.with_metadata("language", language);
    }
    document
}
