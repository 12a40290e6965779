use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// How an external command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed {
        /// `None` when the process was killed by a signal.
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The child was killed once the timeout expired.
    TimedOut { after: Duration },
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Completed { code: Some(0), .. })
    }
}

/// Run `program` with `args`, capturing output.
///
/// Failing to spawn is an error; a non-zero exit or a timeout is not.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<CommandOutcome> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    debug!("Running {} {}", program, args.join(" "));
    let child = command
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output,
            Err(_) => {
                // dropping the wait future drops the child, which kills it
                warn!("{} timed out after {:?}", program, limit);
                return Ok(CommandOutcome::TimedOut { after: limit });
            }
        },
        None => child.wait_with_output().await,
    }
    .with_context(|| format!("Failed to wait for {}", program))?;

    Ok(CommandOutcome::Completed {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completed_command() {
        let outcome = run_command("sh", &["-c", "echo hi; echo oops >&2; exit 3"], None, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Completed {
                code: Some(3),
                stdout: "hi\n".to_string(),
                stderr: "oops\n".to_string(),
            }
        );
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let limit = Duration::from_millis(100);
        let outcome = run_command("sleep", &["5"], None, Some(limit)).await.unwrap();
        assert_eq!(outcome, CommandOutcome::TimedOut { after: limit });
    }

    #[tokio::test]
    async fn test_runs_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let outcome = run_command("ls", &[], Some(dir.path()), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(outcome.success());
        match outcome {
            CommandOutcome::Completed { stdout, .. } => assert!(stdout.contains("marker.txt")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        assert!(run_command("definitely-not-a-real-binary-xyz", &[], None, None)
            .await
            .is_err());
    }
}
