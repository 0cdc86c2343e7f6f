//! Thin tmux client for the persistent-terminal-session strategy.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Command;

/// Session names we create and target. Rejecting anything else prevents
/// command injection through a configurable name.
static SESSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid SESSION_PATTERN regex"));

fn validate_session(name: &str) -> Result<()> {
    if !SESSION_PATTERN.is_match(name) {
        anyhow::bail!("Invalid tmux session name: {}", name);
    }
    Ok(())
}

/// Client for interacting with tmux.
pub struct TmuxClient {
    /// Number of scrollback lines to include in captures
    capture_lines: u32,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self { capture_lines: 100 }
    }

    pub fn with_capture_lines(capture_lines: u32) -> Self {
        Self { capture_lines }
    }

    /// Check whether the tmux binary is installed and runnable.
    pub fn is_available(&self) -> bool {
        Command::new("tmux")
            .arg("-V")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Check whether a session with this name already exists.
    pub fn has_session(&self, name: &str) -> Result<bool> {
        validate_session(name)?;
        let output = Command::new("tmux")
            .args(["has-session", "-t", name])
            .output()
            .context("Failed to execute tmux has-session")?;
        Ok(output.status.success())
    }

    /// Create a detached session running `command` in `cwd`.
    pub fn new_session(&self, name: &str, cwd: &str, command: &str) -> Result<()> {
        validate_session(name)?;
        let output = Command::new("tmux")
            .args(["new-session", "-d", "-s", name, "-c", cwd, command])
            .output()
            .context("Failed to execute tmux new-session")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux new-session failed: {}", stderr);
        }

        Ok(())
    }

    /// Kill a session. Succeeds silently if the session is already gone.
    pub fn kill_session(&self, name: &str) -> Result<()> {
        validate_session(name)?;
        let output = Command::new("tmux")
            .args(["kill-session", "-t", name])
            .output()
            .context("Failed to execute tmux kill-session")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("can't find session") && !stderr.contains("no server running") {
                anyhow::bail!("tmux kill-session failed for {}: {}", name, stderr);
            }
        }

        Ok(())
    }

    /// Sends a named key (e.g. "Enter", "Escape", "C-l") to the session.
    pub fn send_keys(&self, name: &str, keys: &str) -> Result<()> {
        validate_session(name)?;
        let output = Command::new("tmux")
            .args(["send-keys", "-t", name, keys])
            .output()
            .context("Failed to execute tmux send-keys")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux send-keys failed for {}: {}", name, stderr);
        }

        Ok(())
    }

    /// Sends literal text (with -l flag) to the session.
    pub fn send_keys_literal(&self, name: &str, keys: &str) -> Result<()> {
        validate_session(name)?;
        let output = Command::new("tmux")
            .args(["send-keys", "-t", name, "-l", keys])
            .output()
            .context("Failed to execute tmux send-keys")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux send-keys failed for {}: {}", name, stderr);
        }

        Ok(())
    }

    /// Drop scrollback so the next capture only sees fresh output.
    pub fn clear_history(&self, name: &str) -> Result<()> {
        validate_session(name)?;
        let output = Command::new("tmux")
            .args(["clear-history", "-t", name])
            .output()
            .context("Failed to execute tmux clear-history")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux clear-history failed for {}: {}", name, stderr);
        }

        Ok(())
    }

    /// Captures the visible content of the session's active pane, without
    /// ANSI codes.
    pub fn capture_pane_plain(&self, name: &str) -> Result<String> {
        validate_session(name)?;
        let start_line = format!("-{}", self.capture_lines);

        let output = Command::new("tmux")
            .args(["capture-pane", "-p", "-t", name, "-S", &start_line])
            .output()
            .context("Failed to execute tmux capture-pane")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux capture-pane failed for {}: {}", name, stderr);
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = TmuxClient::new();
        assert_eq!(client.capture_lines, 100);

        let custom = TmuxClient::with_capture_lines(200);
        assert_eq!(custom.capture_lines, 200);
    }

    #[test]
    fn test_validate_session_valid() {
        assert!(validate_session("clawmon-usage").is_ok());
        assert!(validate_session("main").is_ok());
        assert!(validate_session("my_session_2").is_ok());
    }

    #[test]
    fn test_validate_session_invalid() {
        assert!(validate_session("").is_err());
        assert!(validate_session("; rm -rf /").is_err());
        assert!(validate_session("name; echo pwned").is_err());
        assert!(validate_session("$(whoami)").is_err());
        assert!(validate_session("`whoami`").is_err());
        assert!(validate_session("name\necho evil").is_err());
        assert!(validate_session("../etc/passwd").is_err());
        assert!(validate_session("with space").is_err());
    }
}
