//! One-shot pseudo-terminal: for environments without tmux, allocate a
//! throwaway PTY, script the status query, and capture the transcript.
//!
//! The transcript goes through a temp file that is removed on every exit
//! path, so a crash between polls leaves at most one stale artifact and a
//! normal run leaves none.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tracing::{debug, warn};

use super::Acquire;
use crate::config::Settings;
use crate::error::AcquireError;
use crate::usage::{CapturedOutput, Source};

/// Temp file holding one capture's terminal transcript. Removed on drop,
/// which covers success, timeout, and every error path.
struct TranscriptArtifact {
    path: PathBuf,
}

impl TranscriptArtifact {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("clawmon-transcript-{}.txt", uuid::Uuid::new_v4()));
        Self { path }
    }
}

impl Drop for TranscriptArtifact {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[derive(Clone)]
struct OneShotConfig {
    bin: String,
    usage_command: String,
    settle_delay: Duration,
}

pub struct OneShotPty {
    config: OneShotConfig,
    interval: Duration,
}

impl OneShotPty {
    pub fn new(settings: &Settings) -> Self {
        Self {
            config: OneShotConfig {
                bin: settings.claude_bin.clone(),
                usage_command: settings.usage_command.clone(),
                settle_delay: settings.settle_delay,
            },
            interval: settings.session_interval,
        }
    }
}

impl Acquire for OneShotPty {
    fn source(&self) -> Source {
        Source::OneShotPseudoTerminal
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }

    async fn acquire(&mut self, timeout: Duration) -> Result<CapturedOutput, AcquireError> {
        let config = self.config.clone();
        // The whole PTY round-trip is blocking I/O
        tokio::task::spawn_blocking(move || run_one_shot(&config, timeout))
            .await
            .map_err(|e| AcquireError::ProcessSpawnFailed(e.to_string()))?
    }
}

/// Sleep for `d`, but never past `deadline`.
fn sleep_capped(d: Duration, deadline: Instant) {
    let nap = d.min(deadline.saturating_duration_since(Instant::now()));
    if !nap.is_zero() {
        thread::sleep(nap);
    }
}

fn run_one_shot(
    config: &OneShotConfig,
    timeout: Duration,
) -> Result<CapturedOutput, AcquireError> {
    let artifact = TranscriptArtifact::new();

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 40,
            cols: 120,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| AcquireError::ProcessSpawnFailed(e.to_string()))?;

    let mut cmd = CommandBuilder::new(&config.bin);
    if let Ok(home) = std::env::var("HOME") {
        cmd.cwd(home);
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| AcquireError::ProcessSpawnFailed(e.to_string()))?;
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| AcquireError::ProcessSpawnFailed(e.to_string()))?;
    let mut writer = pair
        .master
        .take_writer()
        .map_err(|e| AcquireError::ProcessSpawnFailed(e.to_string()))?;

    debug!("One-shot PTY: spawned {}, transcript at {:?}", config.bin, artifact.path);

    // Stream the transcript to the artifact file until the PTY closes
    let transcript_path = artifact.path.clone();
    let reader_thread = thread::spawn(move || {
        let Ok(mut file) = fs::File::create(&transcript_path) else {
            return;
        };
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if file.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = file.sync_all();
    });

    // The timeout covers the whole acquisition, so the deadline counts
    // from spawn and the scripted pauses are capped against it
    let deadline = Instant::now() + timeout;

    // Scripted input: let the tool start, ask for usage, let it render,
    // then quit it the same way a user would.
    sleep_capped(config.settle_delay, deadline);
    let _ = writer.write_all(config.usage_command.as_bytes());
    let _ = writer.write_all(b"\r");
    let _ = writer.flush();
    sleep_capped(config.settle_delay, deadline);
    let _ = writer.write_all(b"\x1b"); // Escape closes the overlay
    let _ = writer.write_all(b"\x03\x03"); // Ctrl+C twice quits the tool
    let _ = writer.flush();

    let mut timed_out = false;
    let mut exit_status = None;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                exit_status = Some(status.exit_code() as i32);
                break;
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!("One-shot PTY: killing {} after {:?}", config.bin, timeout);
                    let _ = child.kill();
                    timed_out = true;
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                warn!("One-shot PTY: wait failed: {}", e);
                let _ = child.kill();
                break;
            }
        }
    }

    // Closing the master ends the reader thread
    drop(writer);
    drop(pair.master);
    let _ = reader_thread.join();

    let text = fs::read_to_string(&artifact.path).unwrap_or_default();
    drop(artifact);

    if text.trim().is_empty() {
        if timed_out {
            return Err(AcquireError::ProcessTimedOut(timeout));
        }
        return Err(AcquireError::EmptyOutput);
    }

    // A timed-out run that still rendered usage text is worth parsing;
    // the flag records what happened.
    Ok(CapturedOutput {
        raw_text: text,
        channel: Source::OneShotPseudoTerminal,
        exit_status,
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_removed_on_drop() {
        let artifact = TranscriptArtifact::new();
        let path = artifact.path.clone();
        fs::write(&path, "transcript text").unwrap();
        assert!(path.exists());

        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn test_artifact_drop_tolerates_missing_file() {
        let artifact = TranscriptArtifact::new();
        // Never written; drop must not panic
        drop(artifact);
    }

    #[test]
    fn test_artifact_paths_are_unique() {
        let a = TranscriptArtifact::new();
        let b = TranscriptArtifact::new();
        assert_ne!(a.path, b.path);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let mut settings = Settings::default();
        settings.claude_bin = "clawmon-no-such-binary".to_string();
        settings.settle_delay = Duration::from_millis(10);
        let mut strategy = OneShotPty::new(&settings);

        let result = strategy.acquire(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(AcquireError::ProcessSpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_captures_transcript_and_cleans_up() {
        let mut settings = Settings::default();
        settings.claude_bin = "cat".to_string();
        settings.usage_command = "Usage: 40%".to_string();
        settings.settle_delay = Duration::from_millis(200);
        let mut strategy = OneShotPty::new(&settings);

        // `cat` echoes the scripted input back and exits on the Ctrl+C
        let captured = strategy.acquire(Duration::from_secs(10)).await.unwrap();
        assert!(captured.raw_text.contains("Usage: 40%"));
        assert_eq!(captured.channel, Source::OneShotPseudoTerminal);
    }

    #[tokio::test]
    async fn test_timeout_deadline_starts_at_spawn() {
        let mut settings = Settings::default();
        settings.claude_bin = "cat".to_string();
        settings.usage_command = "Usage: 40%".to_string();
        // Settle pauses far beyond the timeout must not stretch it
        settings.settle_delay = Duration::from_secs(10);
        let mut strategy = OneShotPty::new(&settings);

        let start = Instant::now();
        let _ = strategy.acquire(Duration::from_millis(300)).await;
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "acquisition overran its timeout: {:?}",
            start.elapsed()
        );
    }
}
