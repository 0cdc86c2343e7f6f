//! Persisted usage state.
//!
//! Three artifacts live in the data directory (`~/.clawmon` by default):
//! `usage.json` (the last successfully parsed snapshot, read by the UI
//! process on its own timer), `session.json` (liveness metadata rewritten
//! after every poll), and `debug-output.txt` (raw capture kept only when a
//! parse produced no signal).
//!
//! All writes are atomic replace: external readers poll these paths with no
//! locking and must never observe a partial file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::usage::{Source, UsageSnapshot};

const USAGE_FILE: &str = "usage.json";
const SESSION_FILE: &str = "session.json";
const DEBUG_FILE: &str = "debug-output.txt";

/// Write `contents` to `path` via a temp file and rename.
///
/// The temp file is opened with `create_new` so a stale symlink left at the
/// temp path cannot redirect the write.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {:?}", parent))?;
    }

    let temp_path = path.with_extension("tmp");

    // Remove leftovers from a previous failed write
    let _ = fs::remove_file(&temp_path);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;

    file.write_all(contents)
        .with_context(|| format!("Failed to write temp file: {:?}", temp_path))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file: {:?}", temp_path))?;

    fs::rename(&temp_path, path).with_context(|| format!("Failed to rename into: {:?}", path))?;

    Ok(())
}

/// Durable store for the last known usage snapshot.
///
/// Append-only-on-success: a failed capture or parse never touches the
/// file, so "no new data" is indistinguishable from "repeat the previous
/// value" for readers.
pub struct UsageStore {
    path: PathBuf,
}

impl UsageStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(USAGE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the persisted snapshot.
    pub fn write(&self, snapshot: &UsageSnapshot) -> Result<()> {
        let json =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
        write_atomic(&self.path, json.as_bytes())?;
        debug!("Persisted usage snapshot to {:?}", self.path);
        Ok(())
    }

    /// Read the last persisted snapshot, degrading to the zero default when
    /// the file is absent, unreadable, or corrupt.
    pub fn read_or_default(&self, source: Source) -> UsageSnapshot {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Corrupt usage file {:?}: {}; using default", self.path, e);
                    UsageSnapshot::zero(source)
                }
            },
            Err(_) => UsageSnapshot::zero(source),
        }
    }
}

/// Cross-process liveness metadata, rewritten after every poll whether or
/// not it yielded a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Last successfully parsed snapshot, if any
    pub last_snapshot: Option<UsageSnapshot>,
    /// When the scheduler last completed a poll, success or not
    pub last_update: DateTime<Utc>,
}

/// The session metadata file. Loaded once at startup to seed in-memory
/// state; written after every parse attempt.
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted session state; `None` when absent or unreadable.
    pub fn load(&self) -> Option<SessionState> {
        let contents = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Corrupt session file {:?}: {}", self.path, e);
                None
            }
        }
    }

    pub fn write(&self, state: &SessionState) -> Result<()> {
        let json =
            serde_json::to_string_pretty(state).context("Failed to serialize session state")?;
        write_atomic(&self.path, json.as_bytes())
    }
}

/// Persist raw captured text after a total parse failure so the format the
/// tool actually printed can be inspected later.
pub fn write_debug_dump(data_dir: &Path, raw_text: &str) -> Result<PathBuf> {
    let path = data_dir.join(DEBUG_FILE);
    write_atomic(&path, raw_text.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::Partial;
    use pretty_assertions::assert_eq;

    fn sample_snapshot() -> UsageSnapshot {
        UsageSnapshot::from_partial(
            Partial {
                percentage: 71.6,
                subscription: Some("Claude Pro".to_string()),
                messages_used: Some(3),
                message_limit: Some(12),
                reset_info: Some("Resets 1am (Asia/Tokyo)".to_string()),
            },
            Source::PersistentTerminalSession,
            Utc::now(),
            5,
        )
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = UsageStore::new(dir.path());

        let snapshot = sample_snapshot();
        store.write(&snapshot).unwrap();

        let read_back = store.read_or_default(Source::DirectInvoke);
        assert_eq!(read_back, snapshot);
    }

    #[test]
    fn test_missing_file_degrades_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = UsageStore::new(dir.path());

        let snapshot = store.read_or_default(Source::DirectInvoke);
        assert_eq!(snapshot.percentage, 0.0);
        assert_eq!(snapshot.limit, 100.0);
        assert_eq!(snapshot.source, Source::DirectInvoke);
        assert!(!snapshot.is_real);
    }

    #[test]
    fn test_corrupt_file_degrades_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = UsageStore::new(dir.path());
        fs::write(store.path(), "not json at all {{{").unwrap();

        let snapshot = store.read_or_default(Source::OneShotPseudoTerminal);
        assert_eq!(snapshot.percentage, 0.0);
        assert_eq!(snapshot.source, Source::OneShotPseudoTerminal);
    }

    #[test]
    fn test_write_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deeper").join("still");
        let store = UsageStore::new(&nested);

        store.write(&sample_snapshot()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = UsageStore::new(dir.path());
        store.write(&sample_snapshot()).unwrap();

        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_session_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionFile::new(dir.path());

        assert!(session.load().is_none());

        let state = SessionState {
            last_snapshot: Some(sample_snapshot()),
            last_update: Utc::now(),
        };
        session.write(&state).unwrap();

        let loaded = session.load().unwrap();
        assert_eq!(loaded.last_update, state.last_update);
        assert_eq!(loaded.last_snapshot, state.last_snapshot);
    }

    #[test]
    fn test_debug_dump_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_debug_dump(dir.path(), "\x1b[31mgarbled output\x1b[0m").unwrap();
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("garbled output"));
    }
}
