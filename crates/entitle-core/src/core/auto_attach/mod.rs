//! Durable, resumable retry loop for a failed boot-time auto-attach.
//!
//! State is written before every sleep, so a process killed at any point
//! resumes at the interval it was waiting on instead of starting over.

mod clock;
mod engine;
mod reasons;
mod state;

pub use clock::{Clock, SystemClock};
pub use engine::{cleanup, schedule_retry, AttachAction, RetryAutoAttach, RetryOutcome};
pub use reasons::AttachError;
pub use state::RetryStateStore;
