//! Direct invocation: run `claude <status-args>` once with piped stdio.
//!
//! Cheapest strategy, but the CLI may refuse to print usage without a
//! terminal; the parser decides whether the output was usable.

use std::process::Stdio;
use std::time::Duration;

use tracing::debug;

use super::Acquire;
use crate::config::Settings;
use crate::error::AcquireError;
use crate::usage::{CapturedOutput, Source};

pub struct DirectInvoke {
    bin: String,
    args: Vec<String>,
    interval: Duration,
}

impl DirectInvoke {
    pub fn new(settings: &Settings) -> Self {
        Self {
            bin: settings.claude_bin.clone(),
            args: settings.status_args.clone(),
            interval: settings.direct_interval,
        }
    }
}

impl Acquire for DirectInvoke {
    fn source(&self) -> Source {
        Source::DirectInvoke
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }

    async fn acquire(&mut self, timeout: Duration) -> Result<CapturedOutput, AcquireError> {
        let mut cmd = tokio::process::Command::new(&self.bin);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Direct invoke: {} {:?}", self.bin, self.args);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            // Dropping the future kills the child; partial output is
            // discarded rather than handed to the parser.
            Err(_) => return Err(AcquireError::ProcessTimedOut(timeout)),
            Ok(Err(e)) => return Err(AcquireError::ProcessSpawnFailed(e.to_string())),
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        // The CLI prints informational text to stderr in some modes, even on
        // a non-zero exit, so stderr is still worth parsing when stdout is
        // blank.
        let text = if stdout.trim().is_empty() {
            stderr.into_owned()
        } else {
            stdout.into_owned()
        };

        if text.trim().is_empty() {
            return Err(AcquireError::EmptyOutput);
        }

        Ok(CapturedOutput {
            raw_text: text,
            channel: Source::DirectInvoke,
            exit_status: output.status.code(),
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy_for(bin: &str, args: &[&str]) -> DirectInvoke {
        let mut settings = Settings::default();
        settings.claude_bin = bin.to_string();
        settings.status_args = args.iter().map(|s| s.to_string()).collect();
        DirectInvoke::new(&settings)
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let mut strategy = strategy_for("echo", &["Usage: 40%"]);
        let captured = strategy.acquire(Duration::from_secs(5)).await.unwrap();
        assert!(captured.raw_text.contains("Usage: 40%"));
        assert_eq!(captured.channel, Source::DirectInvoke);
        assert_eq!(captured.exit_status, Some(0));
        assert!(!captured.timed_out);
    }

    #[tokio::test]
    async fn test_stderr_used_when_stdout_empty() {
        let mut strategy = strategy_for("sh", &["-c", "echo 'Usage: 12%' >&2"]);
        let captured = strategy.acquire(Duration::from_secs(5)).await.unwrap();
        assert!(captured.raw_text.contains("Usage: 12%"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_with_stderr_still_forwarded() {
        let mut strategy = strategy_for("sh", &["-c", "echo '5-hour: 30%' >&2; exit 3"]);
        let captured = strategy.acquire(Duration::from_secs(5)).await.unwrap();
        assert!(captured.raw_text.contains("5-hour: 30%"));
        assert_eq!(captured.exit_status, Some(3));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_discards() {
        let mut strategy = strategy_for("sleep", &["30"]);
        let result = strategy.acquire(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(AcquireError::ProcessTimedOut(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let mut strategy = strategy_for("clawmon-no-such-binary", &[]);
        let result = strategy.acquire(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(AcquireError::ProcessSpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_empty_output_reported() {
        let mut strategy = strategy_for("true", &[]);
        let result = strategy.acquire(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(AcquireError::EmptyOutput)));
    }
}
