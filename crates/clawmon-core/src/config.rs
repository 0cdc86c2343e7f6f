//! Runtime settings for the monitor.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Which acquisition strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyChoice {
    /// Persistent session when tmux is available, one-shot PTY otherwise
    #[default]
    Auto,
    Direct,
    Session,
    Pty,
}

/// Default data directory: `~/.clawmon`.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clawmon")
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Where usage.json, session.json, and the debug dump live
    pub data_dir: PathBuf,
    /// Binary name or path of the monitored tool
    pub claude_bin: String,
    /// Arguments for the direct-invoke status query
    pub status_args: Vec<String>,
    /// Slash command typed into the interactive tool
    pub usage_command: String,
    /// Well-known tmux session name owned by the session strategy
    pub session_name: String,
    /// Scrollback lines included in tmux captures
    pub capture_lines: u32,
    /// Strategy selection
    pub strategy: StrategyChoice,
    /// Poll period for the cheap direct-invoke strategy
    pub direct_interval: Duration,
    /// Poll period for session/PTY acquisition
    pub session_interval: Duration,
    /// Hard cap on a single acquisition attempt
    pub acquire_timeout: Duration,
    /// Wait after sending input before capturing, so the tool can render
    pub settle_delay: Duration,
    /// How long to wait for the tool to reach its idle prompt on session start
    pub startup_timeout: Duration,
    /// Fixed quota window used to derive resetAt
    pub reset_window_hours: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            claude_bin: "claude".to_string(),
            status_args: vec!["usage".to_string()],
            usage_command: "/usage".to_string(),
            session_name: "clawmon-usage".to_string(),
            capture_lines: 100,
            strategy: StrategyChoice::Auto,
            direct_interval: Duration::from_secs(120),
            session_interval: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
            startup_timeout: Duration::from_secs(30),
            reset_window_hours: 5,
        }
    }
}

impl Settings {
    /// Clamp out-of-range values instead of failing startup.
    pub fn validate(&mut self) {
        if self.direct_interval < Duration::from_secs(10) {
            warn!("direct interval too short, clamping to 10s");
            self.direct_interval = Duration::from_secs(10);
        }
        if self.session_interval < Duration::from_secs(30) {
            warn!("session interval too short, clamping to 30s");
            self.session_interval = Duration::from_secs(30);
        }
        if self.acquire_timeout < Duration::from_secs(5) {
            warn!("acquire timeout too short, clamping to 5s");
            self.acquire_timeout = Duration::from_secs(5);
        }
        if self.reset_window_hours < 1 {
            warn!("reset window must be at least 1 hour, clamping");
            self.reset_window_hours = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.claude_bin, "claude");
        assert_eq!(settings.usage_command, "/usage");
        assert_eq!(settings.reset_window_hours, 5);
        assert_eq!(settings.strategy, StrategyChoice::Auto);
        assert!(settings.data_dir.ends_with(".clawmon"));
    }

    #[test]
    fn test_validate_clamps() {
        let mut settings = Settings::default();
        settings.direct_interval = Duration::from_secs(1);
        settings.session_interval = Duration::from_secs(1);
        settings.acquire_timeout = Duration::from_secs(1);
        settings.reset_window_hours = 0;
        settings.validate();

        assert_eq!(settings.direct_interval, Duration::from_secs(10));
        assert_eq!(settings.session_interval, Duration::from_secs(30));
        assert_eq!(settings.acquire_timeout, Duration::from_secs(5));
        assert_eq!(settings.reset_window_hours, 1);
    }
}
