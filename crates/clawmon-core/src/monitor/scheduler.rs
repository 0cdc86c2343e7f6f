//! Polling scheduler: drives periodic acquisition without overlap and
//! survives hangs, parse failures, and store errors.
//!
//! State machine is `Idle -> Checking -> Idle`. A poll request that arrives
//! while a check is in flight is skipped and discarded, never queued.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::acquire::Acquire;
use crate::config::Settings;
use crate::events::{event_channel, EventReceiver, EventSender, MonitorEvent};
use crate::sanitize::sanitize;
use crate::store::{write_debug_dump, SessionFile, SessionState, UsageStore};
use crate::usage::{extract, UsageSnapshot};

/// What one poll cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// New snapshot parsed, persisted, and published
    Updated(UsageSnapshot),
    /// Capture succeeded but no usable percentage was found
    NoSignal,
    /// Acquisition failed; previous snapshot stands
    Failed,
    /// A check was already in flight; this request was discarded
    Skipped,
}

/// Control handle for a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    poll_tx: mpsc::Sender<()>,
    checking: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// Ask for an immediate poll. Returns false (and does nothing) when a
    /// check is already in flight.
    pub fn request_poll(&self) -> bool {
        if self.checking.load(Ordering::SeqCst) {
            warn!("Poll requested while a check is in flight; skipping");
            return false;
        }
        self.poll_tx.try_send(()).is_ok()
    }

    /// Signal graceful shutdown. Never blocks on an in-flight poll.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub struct Scheduler<A: Acquire> {
    strategy: A,
    store: UsageStore,
    session_file: SessionFile,
    data_dir: PathBuf,
    acquire_timeout: Duration,
    reset_window_hours: i64,
    checking: Arc<AtomicBool>,
    events: EventSender,
    last_snapshot: Option<UsageSnapshot>,
    shutdown_rx: watch::Receiver<bool>,
    poll_rx: Option<mpsc::Receiver<()>>,
}

impl<A: Acquire> Scheduler<A> {
    pub fn new(strategy: A, settings: &Settings) -> (Self, SchedulerHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (poll_tx, poll_rx) = mpsc::channel(1);
        let (events, _) = event_channel();
        let checking = Arc::new(AtomicBool::new(false));

        let handle = SchedulerHandle {
            shutdown_tx: Arc::new(shutdown_tx),
            poll_tx,
            checking: checking.clone(),
        };

        let scheduler = Self {
            strategy,
            store: UsageStore::new(&settings.data_dir),
            session_file: SessionFile::new(&settings.data_dir),
            data_dir: settings.data_dir.clone(),
            acquire_timeout: settings.acquire_timeout,
            reset_window_hours: settings.reset_window_hours,
            checking,
            events,
            last_snapshot: None,
            shutdown_rx,
            poll_rx: Some(poll_rx),
        };

        (scheduler, handle)
    }

    /// Subscribe to usage-updated notifications.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Run one full acquire -> sanitize -> extract -> persist cycle.
    ///
    /// Every error is recovered here; the caller's timer loop never sees
    /// one. The session file's lastUpdate is rewritten on every outcome so
    /// liveness is externally observable.
    pub async fn poll_once(&mut self) -> PollOutcome {
        if self.checking.swap(true, Ordering::SeqCst) {
            warn!("Poll requested while a check is in flight; skipping");
            return PollOutcome::Skipped;
        }
        let outcome = self.run_pipeline().await;
        self.checking.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_pipeline(&mut self) -> PollOutcome {
        let source = self.strategy.source();

        let captured = match self.strategy.acquire(self.acquire_timeout).await {
            Ok(captured) => captured,
            Err(e) => {
                warn!("Acquisition via {} failed: {}", source, e);
                self.write_session_file();
                return PollOutcome::Failed;
            }
        };

        let clean = sanitize(&captured.raw_text);
        match extract(&clean) {
            Some(partial) => {
                let snapshot = UsageSnapshot::from_partial(
                    partial,
                    source,
                    Utc::now(),
                    self.reset_window_hours,
                );

                // A write failure is logged but the in-memory state is
                // still current for event emission
                if let Err(e) = self.store.write(&snapshot) {
                    warn!("Failed to persist usage snapshot: {:#}", e);
                }

                self.last_snapshot = Some(snapshot.clone());
                self.write_session_file();

                info!(
                    "Usage: {}% via {} (reset at {})",
                    snapshot.percentage, source, snapshot.reset_at
                );
                let _ = self.events.send(MonitorEvent::UsageUpdated(snapshot.clone()));

                PollOutcome::Updated(snapshot)
            }
            None => {
                debug!("No usage signal in {} bytes of output", captured.raw_text.len());
                // Keep the raw text so the unrecognized format can be
                // inspected later
                if let Err(e) = write_debug_dump(&self.data_dir, &captured.raw_text) {
                    warn!("Failed to write debug dump: {:#}", e);
                }
                self.write_session_file();
                PollOutcome::NoSignal
            }
        }
    }

    fn write_session_file(&self) {
        let state = SessionState {
            last_snapshot: self.last_snapshot.clone(),
            last_update: Utc::now(),
        };
        if let Err(e) = self.session_file.write(&state) {
            warn!("Failed to write session file: {:#}", e);
        }
    }

    /// Poll, abandoning the in-flight cycle the moment shutdown is
    /// signaled. Returns true when shutdown arrived.
    async fn poll_or_shutdown(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                debug!("Shutdown during in-flight poll; dropping it");
                // The dropped cycle never reached the point that clears
                // the in-flight flag
                self.checking.store(false, Ordering::SeqCst);
                true
            }
            _ = self.poll_once() => false,
        }
    }

    /// Run until shutdown: seed from the session file, poll immediately,
    /// then on a fixed per-strategy interval. External poll requests go
    /// through the same reentrancy guard. A shutdown signal takes effect
    /// even while a poll is in flight.
    pub async fn run(mut self) {
        if let Some(state) = self.session_file.load() {
            debug!("Seeding from session file (last update {})", state.last_update);
            self.last_snapshot = state.last_snapshot;
        }

        let mut shutdown_rx = self.shutdown_rx.clone();
        let Some(mut poll_rx) = self.poll_rx.take() else {
            return;
        };

        if self.poll_or_shutdown(&mut shutdown_rx).await {
            self.stop();
            return;
        }

        let period = self.strategy.poll_interval();
        info!("Polling via {} every {:?}", self.strategy.source(), period);

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval fires immediately; the startup poll already happened
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.poll_or_shutdown(&mut shutdown_rx).await {
                        break;
                    }
                }
                Some(()) = poll_rx.recv() => {
                    if self.poll_or_shutdown(&mut shutdown_rx).await {
                        break;
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.stop();
    }

    /// Persist state and finish. Any persistent tmux session is left alive;
    /// teardown is a separate, explicit operation.
    fn stop(&mut self) {
        self.write_session_file();
        info!("Scheduler stopped; persistent sessions left alive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AcquireError;
    use crate::usage::{CapturedOutput, Source};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct MockAcquire {
        responses: VecDeque<Result<String, AcquireError>>,
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl MockAcquire {
        fn new(responses: Vec<Result<String, AcquireError>>) -> Self {
            Self {
                responses: responses.into(),
                calls: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
            }
        }
    }

    impl Acquire for MockAcquire {
        fn source(&self) -> Source {
            Source::DirectInvoke
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn acquire(&mut self, _timeout: Duration) -> Result<CapturedOutput, AcquireError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.responses.pop_front() {
                Some(Ok(text)) => Ok(CapturedOutput {
                    raw_text: text,
                    channel: Source::DirectInvoke,
                    exit_status: Some(0),
                    timed_out: false,
                }),
                Some(Err(e)) => Err(e),
                None => Err(AcquireError::EmptyOutput),
            }
        }
    }

    fn scheduler_in(
        dir: &std::path::Path,
        responses: Vec<Result<String, AcquireError>>,
    ) -> (Scheduler<MockAcquire>, SchedulerHandle) {
        let mut settings = Settings::default();
        settings.data_dir = dir.to_path_buf();
        Scheduler::new(MockAcquire::new(responses), &settings)
    }

    #[tokio::test]
    async fn test_successful_poll_persists_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sched, _handle) =
            scheduler_in(dir.path(), vec![Ok("Usage: 40% used".to_string())]);
        let mut events = sched.subscribe();

        let outcome = sched.poll_once().await;
        let PollOutcome::Updated(snapshot) = outcome else {
            panic!("expected Updated, got {:?}", outcome);
        };
        assert_eq!(snapshot.percentage, 40.0);

        // Persisted and readable back
        let read_back = sched.store.read_or_default(Source::DirectInvoke);
        assert_eq!(read_back, snapshot);

        // Exactly one event
        let MonitorEvent::UsageUpdated(evt) = events.try_recv().unwrap();
        assert_eq!(evt, snapshot);
        assert!(events.try_recv().is_err());

        // Session file carries the snapshot
        let session = sched.session_file.load().unwrap();
        assert_eq!(session.last_snapshot, Some(snapshot));
    }

    #[tokio::test]
    async fn test_no_signal_preserves_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sched, _handle) = scheduler_in(
            dir.path(),
            vec![
                Ok("Usage: 40%".to_string()),
                Ok("How can I help you today?".to_string()),
            ],
        );
        let mut events = sched.subscribe();

        assert!(matches!(sched.poll_once().await, PollOutcome::Updated(_)));
        assert_eq!(sched.poll_once().await, PollOutcome::NoSignal);

        // Previous snapshot stands
        let persisted = sched.store.read_or_default(Source::DirectInvoke);
        assert_eq!(persisted.percentage, 40.0);

        // Only the first poll emitted an event
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());

        // Raw text kept for inspection
        assert!(dir.path().join("debug-output.txt").exists());
    }

    #[tokio::test]
    async fn test_acquire_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sched, _handle) = scheduler_in(
            dir.path(),
            vec![Err(AcquireError::ProcessTimedOut(Duration::from_secs(30)))],
        );

        assert_eq!(sched.poll_once().await, PollOutcome::Failed);

        // No snapshot was ever written, but liveness was
        assert!(!dir.path().join("usage.json").exists());
        assert!(sched.session_file.load().is_some());
    }

    #[tokio::test]
    async fn test_reentrancy_guard_skips() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sched, handle) =
            scheduler_in(dir.path(), vec![Ok("Usage: 40%".to_string())]);
        let calls = sched.strategy.calls.clone();

        // Simulate an in-flight check
        sched.checking.store(true, Ordering::SeqCst);

        assert_eq!(sched.poll_once().await, PollOutcome::Skipped);
        assert!(!handle.request_poll());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Once the in-flight check finishes, polling works again
        sched.checking.store(false, Ordering::SeqCst);
        assert!(matches!(sched.poll_once().await, PollOutcome::Updated(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sanitizes_before_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sched, _handle) = scheduler_in(
            dir.path(),
            vec![Ok("\x1b[1;32mUsage: 40%\x1b[0m\r\n".to_string())],
        );

        let PollOutcome::Updated(snapshot) = sched.poll_once().await else {
            panic!("expected Updated");
        };
        assert_eq!(snapshot.percentage, 40.0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, handle) = scheduler_in(dir.path(), vec![Ok("Usage: 40%".to_string())]);

        let run = tokio::spawn(sched.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown();

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("scheduler did not stop on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_inflight_poll() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sched, handle) =
            scheduler_in(dir.path(), vec![Ok("Usage: 40%".to_string())]);
        sched.strategy.delay = Duration::from_secs(10);

        let run = tokio::spawn(sched.run());
        // Let the startup poll get in flight, then ask for shutdown
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.shutdown();

        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("shutdown waited for the in-flight poll")
            .unwrap();
    }
}
