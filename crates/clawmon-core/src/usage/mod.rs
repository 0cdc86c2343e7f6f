//! Usage snapshot types and the text extraction engine.

pub mod extract;
pub mod types;

pub use extract::extract;
pub use types::{CapturedOutput, Partial, Source, UsageSnapshot};
