//! Core library for clawmon: acquire the claude CLI's usage text, parse it,
//! and persist normalized snapshots for other processes to read.
//!
//! The pipeline is `Scheduler` -> `Acquire` strategy -> `sanitize` ->
//! `extract` -> `UsageStore` + event bus. Failures at any stage end the
//! poll, never the scheduler.

pub mod acquire;
pub mod config;
pub mod error;
pub mod events;
pub mod monitor;
pub mod sanitize;
pub mod store;
pub mod tmux;
pub mod usage;

pub use acquire::{Acquire, DirectInvoke, OneShotPty, Strategy, TerminalSession};
pub use config::{Settings, StrategyChoice};
pub use error::AcquireError;
pub use events::{EventReceiver, EventSender, MonitorEvent};
pub use monitor::{PollOutcome, Scheduler, SchedulerHandle};
pub use store::{SessionFile, SessionState, UsageStore};
pub use usage::{CapturedOutput, Source, UsageSnapshot};
