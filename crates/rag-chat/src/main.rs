use anyhow::{bail, Context, Result};
use clap::Parser;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use rag_chat::config::Settings;
use rag_chat::document::{self, LoadOptions, SourceKind, TextChunker, DEFAULT_EXCLUDES};
use rag_chat::logging::{self, ActivityLogger, LoggerConfig};
use rag_chat::models::document::Document;
use rag_chat::repl::{format_history, ReplCommand, HELP};
use rag_chat::services::conversation::{
    ChainStrategy, ConversationSession, EmbeddingProvider, HistoryCompactor, LlmProvider,
    VectorIndex,
};
use rag_chat::services::retrieval::InMemoryIndex;
use rag_chat::services::{BulkFetcher, EmbeddingService, LlmService};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Parser, Debug)]
#[command(name = "rag-chat", version, about = "Multi-turn chat, optionally grounded in your documents")]
struct Cli {
    /// Model name; well-known names pick their endpoint (gpt*, llama3, phi3, lmstudio)
    #[arg(short, long)]
    model: Option<String>,

    /// chat | txt | md | json | pdf | web | python
    #[arg(short = 't', long = "type", default_value = "chat")]
    kind: String,

    /// File or directory to load (clone target with --git-url)
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Page to load; repeat for several
    #[arg(short, long)]
    url: Vec<String>,

    #[arg(long)]
    git_url: Option<String>,

    /// Extra exclude globs for source trees
    #[arg(long)]
    exclude: Vec<String>,

    #[arg(long)]
    base_url: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Ask one question, print the answer and exit
    #[arg(long)]
    prompt: Option<String>,

    #[arg(long)]
    system_prompt_template: Option<String>,

    #[arg(long)]
    collection_name: Option<String>,

    #[arg(long)]
    search_type: Option<String>,

    #[arg(long)]
    search_k: Option<usize>,

    #[arg(long)]
    search_fetch_k: Option<usize>,

    /// Replace non-ASCII bytes in text files instead of refusing them
    #[arg(long)]
    auto_clean: bool,

    #[arg(long, default_value = "config/settings")]
    config: PathBuf,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(model) = &self.model {
            settings.backend.model = Some(model.clone());
        }
        if let Some(url) = &self.base_url {
            settings.backend.base_url = Some(url.clone());
        }
        if let Some(key) = &self.openai_api_key {
            settings.backend.api_key = Some(key.clone());
        }
        if settings.backend.model.is_none() && settings.backend.base_url.is_none() {
            settings.backend.model = Some(DEFAULT_MODEL.to_string());
        }
        if let Some(template) = &self.system_prompt_template {
            settings.prompts.system_template = Some(template.clone());
        }
        if let Some(name) = &self.collection_name {
            settings.retrieval.collection_name = Some(name.clone());
        }
        if let Some(search_type) = &self.search_type {
            settings.retrieval.search_type = search_type.clone();
        }
        if let Some(k) = self.search_k {
            settings.retrieval.search_k = k;
        }
        if let Some(fetch_k) = self.search_fetch_k {
            settings.retrieval.search_fetch_k = fetch_k;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)?;
    cli.apply(&mut settings);

    let _log_guard = logging::init(&settings.logging)?;
    info!("🚀 Starting rag-chat ({} mode)", cli.kind);

    let (logger, log_worker) = ActivityLogger::spawn_with_handle(LoggerConfig::default());
    let mut session = build_session(&cli, &settings, logger).await?;

    let result = match &cli.prompt {
        Some(prompt) => session
            .invoke(prompt)
            .await
            .map(|answer| println!("{}", answer))
            .map_err(Into::into),
        None => run_repl(&mut session, &settings).await,
    };

    let destroyed = session.destroy().await;
    drop(session);
    if let Err(e) = log_worker.await {
        warn!("Activity logger stopped abnormally: {}", e);
    }

    destroyed?;
    result
}

async fn build_session(
    cli: &Cli,
    settings: &Settings,
    logger: ActivityLogger,
) -> Result<ConversationSession> {
    // Backend settings are checked before any document is loaded.
    let backend: Arc<dyn LlmProvider> = Arc::new(LlmService::new(&settings.backend)?);
    let strategy = build_strategy(cli, settings).await?;

    let mut session = ConversationSession::with_backend(backend, strategy, logger)?;
    if let Some(instruction) = &settings.prompts.summary_instruction {
        session = session.with_compactor(HistoryCompactor::new(instruction.clone()));
    }
    Ok(session)
}

async fn build_strategy(cli: &Cli, settings: &Settings) -> Result<ChainStrategy> {
    if cli.kind.trim().eq_ignore_ascii_case("chat") {
        return Ok(ChainStrategy::Plain {
            system_template: settings.prompts.system_template.clone(),
        });
    }

    let kind: SourceKind = cli.kind.parse()?;
    let search = settings.retrieval.search_params()?;
    let chunker = TextChunker::new(settings.splitter.chunk_size, settings.splitter.chunk_overlap)?;

    let documents = load_documents(kind, cli, settings).await?;
    let chunks = chunker.split_documents(&documents);
    if chunks.is_empty() {
        bail!("No content to index from the {} source", kind);
    }
    info!("Indexing {} chunks from {} documents", chunks.len(), documents.len());

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(EmbeddingService::new(&settings.embedding)?);
    let index = InMemoryIndex::new();
    let handle = index
        .index(chunks, embedder, settings.retrieval.collection_name.clone())
        .await?;

    Ok(ChainStrategy::Retrieval {
        handle,
        search,
        template: settings.prompts.system_template.clone(),
    })
}

async fn load_documents(kind: SourceKind, cli: &Cli, settings: &Settings) -> Result<Vec<Document>> {
    match kind {
        SourceKind::Web => {
            if cli.url.is_empty() {
                bail!("--url is required for web sources");
            }
            let client = Client::builder()
                .timeout(Duration::from_secs(settings.ingest.request_timeout_seconds))
                .build()
                .context("Failed to create HTTP client")?;
            let report = BulkFetcher::new(client, settings.ingest.workers)?
                .fetch_all(cli.url.clone())
                .await;
            for (url, error) in &report.failures {
                warn!("Skipped {}: {}", url, error);
            }
            Ok(report.documents)
        }
        SourceKind::Python => {
            let path = cli
                .path
                .as_deref()
                .context("--path is required for python sources")?;
            if let Some(git_url) = &cli.git_url {
                document::clone_repository(git_url, path, Some(CLONE_TIMEOUT)).await?;
            }
            let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
            excludes.extend(cli.exclude.iter().cloned());
            document::load_source_tree(path, "py", &excludes)
        }
        _ => {
            let path = cli
                .path
                .as_deref()
                .with_context(|| format!("--path is required for {} sources", kind))?;
            document::load_path(kind, path, LoadOptions { auto_clean: cli.auto_clean })
        }
    }
}

async fn run_repl(session: &mut ConversationSession, settings: &Settings) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(b"\nWelcome to the chatbot! Type /help for commands.\n")
        .await?;

    loop {
        stdout.write_all(b"\n** Enter your message: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = ReplCommand::parse(&line);

        let output = match &command {
            ReplCommand::Exit => break,
            ReplCommand::Empty => continue,
            ReplCommand::Help => HELP.to_string(),
            ReplCommand::Reset => {
                session.clear();
                String::new()
            }
            ReplCommand::History => String::new(),
            ReplCommand::Delete(None) => "Invalid index provided.".to_string(),
            ReplCommand::Delete(Some(n)) => {
                if session.modify(Some(*n)) {
                    String::new()
                } else {
                    format!("Cannot delete {} of {} messages.", n, session.history().len())
                }
            }
            ReplCommand::Summarize => match session.summarize().await {
                Ok(true) => String::new(),
                Ok(false) => "Nothing to summarize.".to_string(),
                Err(e) => format!("Summarize failed: {}", e),
            },
            ReplCommand::Save => match session.save_transcript(&settings.history.directory) {
                Ok(path) => format!("Saved to {}", path.display()),
                Err(e) => format!("Save failed: {}", e),
            },
            ReplCommand::Ask(prompt) => match session.invoke(prompt).await {
                Ok(answer) => format!("++Chatbot: {}", answer),
                Err(e) => format!("Error: {}", e),
            },
        };

        let mut text = output;
        if command.shows_history() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format_history(session.history()));
        }
        stdout.write_all(format!("\n{}\n", text).as_bytes()).await?;
    }

    stdout.write_all(b"\nGoodbye!\n").await?;
    stdout.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_chat::config::BackendKindName;
    use rag_chat::utils::error::ChatError;

    #[tokio::test]
    async fn test_backend_errors_surface_before_loading() {
        let cli = Cli::parse_from([
            "rag-chat",
            "--type",
            "txt",
            "--path",
            "/nonexistent/notes.txt",
        ]);
        let mut settings = Settings::default();
        settings.backend.kind = Some(BackendKindName::Hosted);
        settings.backend.base_url = None;

        let err = build_session(&cli, &settings, ActivityLogger::inline())
            .await
            .err()
            .expect("hosted backend without a url must be rejected");
        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::Configuration(_))
        ));
    }
}
