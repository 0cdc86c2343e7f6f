//! Persistent terminal session: keep the claude CLI running interactively
//! in a detached tmux session and scrape the `/usage` overlay each poll,
//! amortizing the tool's startup cost.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{probe_authentication, Acquire};
use crate::config::Settings;
use crate::error::AcquireError;
use crate::tmux::TmuxClient;
use crate::usage::{CapturedOutput, Source};

/// The tool shows this marker at its idle prompt.
const READY_MARKER: &str = "-- INSERT --";
const TRUST_PROMPT: &str = "Yes, I trust this folder";

/// The one tmux session this strategy owns.
///
/// `alive` is advisory: any tmux failure clears it, and the next poll
/// re-checks `has-session` instead of trusting the cached flag.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub name: String,
    pub alive: bool,
}

pub struct TerminalSession {
    tmux: TmuxClient,
    handle: SessionHandle,
    bin: String,
    usage_command: String,
    settle_delay: Duration,
    startup_timeout: Duration,
    interval: Duration,
}

impl TerminalSession {
    /// One-time initialization with pre-flight checks. `CapabilityMissing`
    /// (no tmux) and `NotAuthenticated` refuse the whole strategy, not a
    /// single poll.
    pub async fn init(settings: &Settings) -> Result<Self, AcquireError> {
        let tmux = TmuxClient::with_capture_lines(settings.capture_lines);
        if !tmux.is_available() {
            return Err(AcquireError::CapabilityMissing("tmux".to_string()));
        }

        probe_authentication(
            &settings.claude_bin,
            &settings.status_args,
            settings.acquire_timeout,
        )
        .await?;

        Ok(Self {
            tmux,
            handle: SessionHandle {
                name: settings.session_name.clone(),
                alive: false,
            },
            bin: settings.claude_bin.clone(),
            usage_command: settings.usage_command.clone(),
            settle_delay: settings.settle_delay,
            startup_timeout: settings.startup_timeout,
            interval: settings.session_interval,
        })
    }

    /// Establish the session if it is not already running. Idempotent: an
    /// existing session with the well-known name is attached to, never
    /// recreated.
    async fn ensure_session(&mut self) -> Result<(), AcquireError> {
        let name = self.handle.name.clone();

        let exists = self
            .tmux
            .has_session(&name)
            .map_err(|e| AcquireError::ProcessSpawnFailed(e.to_string()))?;
        if exists {
            if !self.handle.alive {
                info!("Attaching to existing session {}", name);
                self.handle.alive = true;
            }
            return Ok(());
        }

        // Home directory is trusted by the tool, avoiding the
        // "trust this folder?" prompt in most setups.
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());

        info!("Creating session {} running {}", name, self.bin);
        self.tmux
            .new_session(&name, &home, &self.bin)
            .map_err(|e| AcquireError::ProcessSpawnFailed(e.to_string()))?;

        if !self.wait_for_ready(&name).await {
            let _ = self.tmux.kill_session(&name);
            self.handle.alive = false;
            return Err(AcquireError::ProcessTimedOut(self.startup_timeout));
        }

        self.handle.alive = true;
        Ok(())
    }

    /// Poll until the tool shows its idle prompt, auto-confirming the trust
    /// prompt along the way.
    async fn wait_for_ready(&self, name: &str) -> bool {
        let start = Instant::now();
        let mut trust_confirmed = false;

        while start.elapsed() < self.startup_timeout {
            tokio::time::sleep(Duration::from_millis(500)).await;

            if let Ok(content) = self.tmux.capture_pane_plain(name) {
                if content.contains(READY_MARKER) {
                    debug!("Session {}: tool is ready", name);
                    return true;
                }
                if !trust_confirmed && content.contains(TRUST_PROMPT) {
                    debug!("Session {}: auto-confirming trust prompt", name);
                    let _ = self.tmux.send_keys(name, "Enter");
                    trust_confirmed = true;
                }
            }
        }

        warn!("Session {}: tool did not become ready in time", name);
        false
    }

    /// Poll until the usage overlay renders (any percent sign counts),
    /// bounded by `timeout`.
    async fn wait_for_overlay(&self, name: &str, timeout: Duration) -> Option<String> {
        let start = Instant::now();

        while start.elapsed() < timeout {
            tokio::time::sleep(Duration::from_millis(300)).await;

            if let Ok(content) = self.tmux.capture_pane_plain(name) {
                if content.contains('%') {
                    return Some(content);
                }
            }
        }

        None
    }

    /// Kill the underlying tmux session. Never implied by scheduler stop;
    /// only an explicit teardown reaches here.
    pub fn teardown(&mut self) -> anyhow::Result<()> {
        self.tmux.kill_session(&self.handle.name)?;
        self.handle.alive = false;
        info!("Tore down session {}", self.handle.name);
        Ok(())
    }
}

impl Acquire for TerminalSession {
    fn source(&self) -> Source {
        Source::PersistentTerminalSession
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }

    async fn acquire(&mut self, timeout: Duration) -> Result<CapturedOutput, AcquireError> {
        self.ensure_session().await?;
        let name = self.handle.name.clone();

        let result = self.run_usage_protocol(&name, timeout).await;
        if result.is_err() {
            // Next poll re-checks has-session instead of trusting the flag
            self.handle.alive = false;
        }
        result
    }
}

impl TerminalSession {
    /// Per-poll protocol: clear the buffer, settle, send the status-query
    /// keystrokes, settle, snapshot the visible pane.
    async fn run_usage_protocol(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<CapturedOutput, AcquireError> {
        let fail = |e: anyhow::Error| AcquireError::ProcessSpawnFailed(e.to_string());

        self.tmux.clear_history(name).map_err(fail)?;
        tokio::time::sleep(self.settle_delay).await;

        self.tmux
            .send_keys_literal(name, &self.usage_command)
            .map_err(fail)?;
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.tmux.send_keys(name, "Enter").map_err(fail)?;

        tokio::time::sleep(self.settle_delay).await;
        let overlay = self.wait_for_overlay(name, timeout).await;

        // Close the overlay so the session is idle for the next poll
        let _ = self.tmux.send_keys(name, "Escape");

        let text = match overlay {
            Some(text) => text,
            None => self.tmux.capture_pane_plain(name).map_err(fail)?,
        };

        if text.trim().is_empty() {
            return Err(AcquireError::EmptyOutput);
        }

        Ok(CapturedOutput {
            raw_text: text,
            channel: Source::PersistentTerminalSession,
            exit_status: None,
            timed_out: false,
        })
    }
}
