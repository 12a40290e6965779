use anyhow::{bail, Context, Result};
use glob::Pattern;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::loader::{decode_text, find_files};
use crate::models::document::Document;
use crate::utils::command::{run_command, CommandOutcome};
use crate::utils::error::ChatError;
use crate::utils::url::is_valid_git_url;

pub const DEFAULT_EXCLUDES: [&str; 7] = [
    "env/**/*",
    "venv/**/*",
    ".git/**/*",
    ".idea/**/*",
    ".vscode/**/*",
    "**/__pycache__/**/*",
    "**/.pytest_cache/**/*",
];

/// Source files with `extension` under `root`, skipping paths (relative to
/// `root`) that match any exclude glob.
pub fn load_source_tree(root: &Path, extension: &str, excludes: &[String]) -> Result<Vec<Document>> {
    if !root.exists() {
        return Err(ChatError::Validation(format!(
            "Invalid path: {}. No such file or directory.",
            root.display()
        ))
        .into());
    }

    let patterns = excludes
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("Bad exclude pattern {}", p)))
        .collect::<Result<Vec<_>>>()?;

    let mut documents = Vec::new();
    let mut skipped = 0usize;
    for file in find_files(root, extension)? {
        let relative = file.strip_prefix(root).unwrap_or(&file);
        if patterns.iter().any(|p| p.matches_path(relative)) {
            skipped += 1;
            continue;
        }

        let raw = std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
        let (content, _) = decode_text(&raw);
        documents.push(
            Document::new(content)
                .with_source(file.display().to_string())
                .with_metadata("language", language_for(extension)),
        );
    }

    info!(
        "Loaded {} source files from {} ({} excluded)",
        documents.len(),
        root.display(),
        skipped
    );
    Ok(documents)
}

fn language_for(extension: &str) -> &str {
    match extension {
        "py" => "python",
        "rs" => "rust",
        "js" => "javascript",
        "ts" => "typescript",
        other => other,
    }
}

/// Shallow-clone `git_url` into `dest` with the `git` binary.
pub async fn clone_repository(git_url: &str, dest: &Path, timeout: Option<Duration>) -> Result<()> {
    if !is_valid_git_url(git_url) {
        return Err(ChatError::Validation(format!("Invalid git_url: {}", git_url)).into());
    }

    let dest_str = dest.to_string_lossy();
    let outcome = run_command(
        "git",
        &["clone", "--depth", "1", git_url, dest_str.as_ref()],
        None,
        timeout,
    )
    .await?;

    match outcome {
        CommandOutcome::Completed { code: Some(0), .. } => {
            info!("Repository cloned from {} to {}", git_url, dest.display());
            Ok(())
        }
        CommandOutcome::Completed { code, stderr, .. } => {
            warn!("git clone exited with {:?}", code);
            bail!("Failed to clone repository {}: {}", git_url, stderr.trim())
        }
        CommandOutcome::TimedOut { after } => {
            bail!("Cloning {} timed out after {:?}", git_url, after)
        }
    }
}
