//! Error taxonomy for the acquisition layer.

use std::time::Duration;

/// Errors a strategy can report from `acquire` or its one-time init.
///
/// None of these are fatal to the process: `CapabilityMissing` and
/// `NotAuthenticated` abort strategy initialization (the caller falls back
/// or surfaces the condition), the rest end a single poll as a failure.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// A required external facility (tmux, the claude binary) is not installed.
    #[error("required capability missing: {0}")]
    CapabilityMissing(String),

    /// The claude CLI is installed but not logged in.
    #[error("claude CLI is not authenticated; run the tool and log in first")]
    NotAuthenticated,

    /// The spawned process did not finish within the timeout and was killed.
    #[error("process did not finish within {0:?} and was terminated")]
    ProcessTimedOut(Duration),

    /// The external tool could not be started at all.
    #[error("failed to spawn process: {0}")]
    ProcessSpawnFailed(String),

    /// The tool ran but produced no text on any stream.
    #[error("process produced no output")]
    EmptyOutput,
}
