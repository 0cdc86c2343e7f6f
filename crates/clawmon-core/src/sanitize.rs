//! Strip terminal control sequences from raw captured output.
//!
//! The direct-invoke and PTY channels hand us exactly what the tool wrote,
//! ANSI colors and cursor movement included. The extractor only wants the
//! printable text.

use once_cell::sync::Lazy;
use regex::Regex;

/// CSI sequences (`ESC [ params final`), OSC sequences (`ESC ] ... BEL/ST`),
/// and two-byte `ESC x` escapes.
static ANSI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("Invalid ANSI_PATTERN regex")
});

/// Remove ANSI/VT escape sequences, keeping printable content intact.
///
/// Pure and infallible: anything that does not match a known sequence is
/// left as-is. Carriage returns are dropped so tmux/PTY captures and plain
/// pipes produce the same line structure.
pub fn sanitize(raw: &str) -> String {
    let stripped = ANSI_PATTERN.replace_all(raw, "");
    stripped.replace('\r', "")
}
