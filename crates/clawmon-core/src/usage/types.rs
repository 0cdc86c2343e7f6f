//! Usage snapshot types shared between the extractor, the store, and the
//! external UI reader.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which acquisition channel produced a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// One-shot `claude <args>` invocation with piped stdio
    DirectInvoke,
    /// Long-lived detached tmux session running the tool interactively
    PersistentTerminalSession,
    /// Throwaway PTY allocated for a single scripted invocation
    OneShotPseudoTerminal,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Source::DirectInvoke => "direct-invoke",
            Source::PersistentTerminalSession => "persistent-terminal-session",
            Source::OneShotPseudoTerminal => "one-shot-pseudo-terminal",
        };
        f.write_str(s)
    }
}

/// Raw text captured from one acquisition attempt. Ephemeral: consumed by
/// the extractor and discarded, never persisted.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    /// Combined text as captured (ANSI codes still present)
    pub raw_text: String,
    /// Which channel produced it
    pub channel: Source,
    /// Exit status of the spawned process, when one applies
    pub exit_status: Option<i32>,
    /// Whether the capture hit its timeout before the tool finished
    pub timed_out: bool,
}

/// What the extractor found in one pass over sanitized text.
///
/// `percentage` is always populated when this exists at all; the extractor
/// returns `None` instead of a zeroed partial when no rule matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partial {
    /// Usage percentage in [0, 100], unrounded
    pub percentage: f64,
    /// Subscription/plan name, trimmed
    pub subscription: Option<String>,
    /// Messages used so far in the window
    pub messages_used: Option<u64>,
    /// Message cap for the window
    pub message_limit: Option<u64>,
    /// Raw reset-time hint as printed by the tool (not parsed)
    pub reset_info: Option<String>,
}

/// One persisted usage measurement plus provenance and derived reset time.
///
/// Serialized camelCase because the external UI process reads the JSON file
/// directly and the field names are its contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    /// Usage percentage rounded for display
    pub percentage: f64,
    /// Unrounded usage percentage
    pub used: f64,
    /// Quota limit in percentage space (always 100 for real captures)
    pub limit: f64,
    /// When the current quota window is expected to reset
    pub reset_at: DateTime<Utc>,
    /// Subscription/plan name when the tool printed one
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subscription: Option<String>,
    /// Messages used, when the tool printed a ratio
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub messages_used: Option<u64>,
    /// Message cap, when the tool printed a ratio
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message_limit: Option<u64>,
    /// Raw reset hint text from the tool, informational only
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reset_info: Option<String>,
    /// Acquisition channel that produced this snapshot
    pub source: Source,
    /// When the capture happened
    pub captured_at: DateTime<Utc>,
    /// True for parsed captures; reserved false for synthetic snapshots
    pub is_real: bool,
}

impl UsageSnapshot {
    /// Build a snapshot from an extraction result.
    ///
    /// `reset_at` is always capture time plus the fixed window; the tool's
    /// own reset text is kept verbatim in `reset_info` but never parsed.
    pub fn from_partial(
        partial: Partial,
        source: Source,
        captured_at: DateTime<Utc>,
        window_hours: i64,
    ) -> Self {
        Self {
            percentage: partial.percentage.round(),
            used: partial.percentage,
            limit: 100.0,
            reset_at: captured_at + Duration::hours(window_hours),
            subscription: partial.subscription,
            messages_used: partial.messages_used,
            message_limit: partial.message_limit,
            reset_info: partial.reset_info,
            source,
            captured_at,
            is_real: true,
        }
    }

    /// Zero-value default used when nothing has ever been persisted.
    pub fn zero(source: Source) -> Self {
        let now = Utc::now();
        Self {
            percentage: 0.0,
            used: 0.0,
            limit: 100.0,
            reset_at: now,
            subscription: None,
            messages_used: None,
            message_limit: None,
            reset_info: None,
            source,
            captured_at: now,
            is_real: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_partial_computes_reset_window() {
        let captured_at = Utc::now();
        let partial = Partial {
            percentage: 71.6,
            ..Default::default()
        };
        let snapshot =
            UsageSnapshot::from_partial(partial, Source::DirectInvoke, captured_at, 5);

        assert_eq!(snapshot.percentage, 72.0);
        assert_eq!(snapshot.used, 71.6);
        assert_eq!(snapshot.limit, 100.0);
        assert_eq!(snapshot.reset_at, captured_at + Duration::hours(5));
        assert!(snapshot.is_real);
    }

    #[test]
    fn test_source_serializes_kebab_case() {
        let json = serde_json::to_string(&Source::PersistentTerminalSession).unwrap();
        assert_eq!(json, "\"persistent-terminal-session\"");
    }

    #[test]
    fn test_snapshot_json_field_names() {
        let snapshot = UsageSnapshot::from_partial(
            Partial {
                percentage: 40.0,
                subscription: Some("Claude Pro".to_string()),
                ..Default::default()
            },
            Source::OneShotPseudoTerminal,
            Utc::now(),
            5,
        );
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"resetAt\""));
        assert!(json.contains("\"capturedAt\""));
        assert!(json.contains("\"isReal\":true"));
        assert!(json.contains("\"subscription\":\"Claude Pro\""));
        // Absent enrichment fields stay off the wire
        assert!(!json.contains("messagesUsed"));
    }
}
