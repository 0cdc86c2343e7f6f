//! Prioritized pattern matching over sanitized tool output.
//!
//! The claude CLI prints usage as free text with no stable format, so the
//! extractor runs an ordered list of rules and takes the first one that
//! yields a plausible percentage. Metadata rules (subscription, reset hint,
//! message ratio) are scoped independently and merged regardless of which
//! primary rule won. A bare embedded JSON object beats free text.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use super::types::Partial;

/// Rule 1a: "Usage: N%", "Current usage: N%", "Model usage: N%", "Used: N%"
static USAGE_LABELED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:usage|used)\s*:\s*(\d+(?:\.\d+)?)\s*%").expect("Invalid USAGE_LABELED")
});

/// Rule 1b: "N% used", "N% of", "N% usage"
static PERCENT_PHRASED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%\s*(?:used|of|usage)").expect("Invalid PERCENT_PHRASED")
});

/// Rule 2: "N / M messages" (also requests/queries)
static MESSAGE_RATIO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s*/\s*(\d+)\s*(?:messages?|requests?|queries)")
        .expect("Invalid MESSAGE_RATIO")
});

/// Rule 3: "5-hour: N%", "3-hour: N%", "hourly: N%"
static WINDOW_LABELED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\d+\s*-\s*hour|hourly)\s*:\s*(\d+(?:\.\d+)?)\s*%")
        .expect("Invalid WINDOW_LABELED")
});

/// Rule 4: "API Usage: N%", "API Limit: N%"
static API_LABELED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)api\s+(?:usage|limit)\s*:\s*(\d+(?:\.\d+)?)\s*%")
        .expect("Invalid API_LABELED")
});

/// Rule 5: "N tokens remaining" and friends. Informational only.
static TOKEN_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([\d,]+)\s*(?:tokens?|credits?)\s+(?:remaining|used|left)")
        .expect("Invalid TOKEN_COUNT")
});

/// Rule 6: candidate embedded JSON objects (flat, no nesting)
static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^{}]*\}").expect("Invalid JSON_OBJECT"));

/// Rule 7: any bare "N%", the last-resort fallback
static BARE_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("Invalid BARE_PERCENT"));

/// Independent: "Subscription: <plan>", "Plan: <plan>"
static SUBSCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:subscription|plan)\s*:\s*([^\r\n]+)").expect("Invalid SUBSCRIPTION")
});

/// Independent: "Resets 1am (Asia/Tokyo)", "Reset: 3pm"
static RESET_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bresets?\b:?\s+([^\r\n]+)").expect("Invalid RESET_HINT"));

/// First match of `re` whose capture group 1 parses to a percentage in
/// [0, 100]. Out-of-range candidates are rejected, not clamped.
fn first_valid_percent(re: &Regex, text: &str) -> Option<f64> {
    for caps in re.captures_iter(text) {
        if let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
            if (0.0..=100.0).contains(&value) {
                return Some(value);
            }
            trace!("Rejected out-of-range percentage candidate: {}", value);
        }
    }
    None
}

/// Derive a usage reading from sanitized text.
///
/// Returns `None` when no rule produced a usable percentage ("no signal",
/// distinct from a measured 0%).
pub fn extract(clean_text: &str) -> Option<Partial> {
    let mut percentage = first_valid_percent(&USAGE_LABELED, clean_text)
        .or_else(|| first_valid_percent(&PERCENT_PHRASED, clean_text));

    // The ratio populates message counts even when a higher-priority rule
    // already set the percentage; it only derives the percentage itself
    // when nothing else has.
    let mut messages_used = None;
    let mut message_limit = None;
    if let Some(caps) = MESSAGE_RATIO.captures(clean_text) {
        let used: Option<u64> = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let limit: Option<u64> = caps.get(2).and_then(|m| m.as_str().parse().ok());
        if let (Some(n), Some(m)) = (used, limit) {
            if m > 0 {
                messages_used = Some(n);
                message_limit = Some(m);
                if percentage.is_none() {
                    let ratio = (100.0 * n as f64 / m as f64).round();
                    if (0.0..=100.0).contains(&ratio) {
                        percentage = Some(ratio);
                    }
                }
            }
        }
    }

    percentage = percentage
        .or_else(|| first_valid_percent(&WINDOW_LABELED, clean_text))
        .or_else(|| first_valid_percent(&API_LABELED, clean_text));

    if percentage.is_none() {
        if let Some(caps) = TOKEN_COUNT.captures(clean_text) {
            // No percentage space to map token counts into
            debug!(
                "Token/credit count found but not usable as percentage: {}",
                caps.get(0).map(|m| m.as_str()).unwrap_or_default()
            );
        }
    }

    percentage = percentage.or_else(|| first_valid_percent(&BARE_PERCENT, clean_text));

    // Structured data beats free text: an embedded JSON object overrides
    // the percentage and message counts found above.
    for m in JSON_OBJECT.find_iter(clean_text) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(m.as_str()) else {
            continue;
        };
        let json_percent = value
            .get("usage")
            .or_else(|| value.get("percentage"))
            .and_then(|v| v.as_f64());
        if let Some(p) = json_percent {
            if (0.0..=100.0).contains(&p) {
                debug!("Embedded JSON overrides free-text percentage: {}", p);
                percentage = Some(p);
            }
        }
        if let Some(n) = value.get("messages_used").and_then(|v| v.as_u64()) {
            messages_used = Some(n);
        }
        if let Some(limit) = value.get("message_limit").and_then(|v| v.as_u64()) {
            message_limit = Some(limit);
        }
    }

    let percentage = percentage?;

    let subscription = SUBSCRIPTION
        .captures(clean_text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());

    // Kept verbatim; the actual reset instant is always derived from the
    // capture time, never parsed from this hint.
    let reset_info = RESET_HINT
        .captures(clean_text)
        .and_then(|caps| caps.get(0))
        .map(|m| m.as_str().trim().to_string());

    Some(Partial {
        percentage,
        subscription,
        messages_used,
        message_limit,
        reset_info,
    })
}
