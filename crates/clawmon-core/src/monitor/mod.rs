//! Polling scheduler and poll outcomes.

pub mod scheduler;

pub use scheduler::{PollOutcome, Scheduler, SchedulerHandle};
